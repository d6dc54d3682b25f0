//! Cartesian motion gate.
//!
//! [`ArmMotion`] wraps the [`MotionBackend`]: it interpolates a waypoint
//! list, refuses to execute paths that cover less than `min_coverage` of the
//! request, and otherwise executes with the segment's scaling.

use std::sync::Arc;

use kitcell_hal::{JointTarget, MotionBackend, MotionLimits};
use kitcell_perception::pose::Pose;
use kitcell_types::CellError;
use tracing::{debug, warn};

use crate::config::{JointPreset, MotionConfig};

#[derive(Clone)]
pub struct ArmMotion {
    backend: Arc<dyn MotionBackend>,
    eef_step: f64,
    min_coverage: f64,
}

impl ArmMotion {
    pub fn new(backend: Arc<dyn MotionBackend>, cfg: &MotionConfig) -> Self {
        Self {
            backend,
            eef_step: cfg.eef_step,
            min_coverage: cfg.min_coverage,
        }
    }

    /// Follow `waypoints` in a straight-line Cartesian path.
    pub async fn move_through(
        &self,
        waypoints: &[Pose],
        limits: MotionLimits,
    ) -> Result<(), CellError> {
        let path = self
            .backend
            .compute_cartesian_path(waypoints, self.eef_step)
            .await?;
        if path.fraction < self.min_coverage {
            warn!(
                fraction = path.fraction,
                threshold = self.min_coverage,
                "unable to plan Cartesian path"
            );
            return Err(CellError::PathCoverage {
                fraction: path.fraction,
                threshold: self.min_coverage,
            });
        }
        debug!(waypoints = waypoints.len(), ?limits, "executing Cartesian path");
        self.backend.execute_trajectory(&path, limits).await
    }

    pub async fn move_to_named(&self, name: &str) -> Result<(), CellError> {
        self.backend
            .plan_and_execute(&JointTarget::Named(name.to_string()))
            .await
    }

    pub async fn move_to_joints(&self, joints: &JointPreset) -> Result<(), CellError> {
        self.backend
            .plan_and_execute(&JointTarget::Joints(joints.clone()))
            .await
    }

    /// Slide along the rail to `position` with the shoulder facing forward.
    pub async fn move_rail(&self, position: f64) -> Result<(), CellError> {
        let joints = JointPreset::from([
            ("linear_actuator_joint".to_string(), position),
            ("floor_shoulder_pan_joint".to_string(), 0.0),
        ]);
        self.move_to_joints(&joints).await
    }

    pub async fn current_pose(&self) -> Result<Pose, CellError> {
        self.backend.current_pose().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitcell_hal::{SimCell, SimCommand, SimConfig};
    use kitcell_middleware::StateStore;

    fn arm_with_coverage(coverage: f64) -> (ArmMotion, Arc<SimCell>) {
        let cell = SimCell::builder(StateStore::new())
            .with_config(SimConfig {
                coverage,
                ..SimConfig::default()
            })
            .build();
        (ArmMotion::new(cell.clone(), &MotionConfig::default()), cell)
    }

    fn waypoints() -> Vec<Pose> {
        vec![
            Pose::from_xyz_yaw(0.0, 0.0, 1.0, 0.0),
            Pose::from_xyz_yaw(0.0, 0.0, 0.8, 0.0),
        ]
    }

    #[tokio::test]
    async fn under_covered_path_is_rejected_and_not_executed() {
        let (arm, cell) = arm_with_coverage(0.5);
        let err = arm
            .move_through(&waypoints(), MotionLimits::new(0.3, 0.3))
            .await
            .unwrap_err();
        assert!(matches!(err, CellError::PathCoverage { .. }));
        assert!(cell.executed_paths().is_empty());
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let (arm, cell) = arm_with_coverage(0.9);
        arm.move_through(&waypoints(), MotionLimits::new(0.3, 0.3))
            .await
            .unwrap();
        assert_eq!(cell.executed_paths().len(), 1);
    }

    #[tokio::test]
    async fn full_path_executes_with_limits() {
        let (arm, cell) = arm_with_coverage(1.0);
        let limits = MotionLimits::new(0.2, 0.1);
        arm.move_through(&waypoints(), limits).await.unwrap();
        let executed = cell.commands().into_iter().find_map(|c| match c {
            SimCommand::ExecuteTrajectory { limits, .. } => Some(limits),
            _ => None,
        });
        assert_eq!(executed, Some(limits));
        assert!((arm.current_pose().await.unwrap().position.z - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rail_move_zeroes_pan() {
        let (arm, cell) = arm_with_coverage(1.0);
        arm.move_rail(-1.2).await.unwrap();
        let Some(SimCommand::PlanAndExecute(JointTarget::Joints(joints))) =
            cell.commands().into_iter().next()
        else {
            panic!("expected a joint move");
        };
        assert_eq!(joints["linear_actuator_joint"], -1.2);
        assert_eq!(joints["floor_shoulder_pan_joint"], 0.0);
    }
}
