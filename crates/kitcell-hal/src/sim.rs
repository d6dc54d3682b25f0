//! [`SimCell`] – in-process stand-in for the whole cell.
//!
//! Implements every collaborator trait, records each outbound call as a
//! [`SimCommand`], and feeds the consequences (gripper attach, tool swaps,
//! AGV arrival, competition phase) back into the [`StateStore`] the way the
//! real feeds would.
//!
//! # Stub behaviour
//!
//! | Collaborator | Behaviour |
//! |---|---|
//! | Motion | Cartesian paths cover `coverage` of the request; execution moves the tool to the last covered waypoint. |
//! | Gripper | After enabling, the part attaches once `attach_after_probes` trajectories ran with the gripper on (`Some(0)` attaches on enable, `None` never). |
//! | Tool changer | Swaps the reported gripper type. |
//! | Frames | Static [`FrameGraph`] pre-loaded with the AGV trays and tool-changer slots. |
//! | Fulfillment | AGVs reach their target after `agv_travel_ms` (`None`: never). |
//!
//! # Example
//!
//! ```rust
//! use kitcell_hal::sim::{SimCell, SimConfig};
//! use kitcell_middleware::StateStore;
//!
//! let store = StateStore::new();
//! let cell = SimCell::builder(store.clone())
//!     .with_config(SimConfig { coverage: 0.5, ..SimConfig::default() })
//!     .build();
//! assert!(cell.commands().is_empty());
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use kitcell_middleware::StateStore;
use kitcell_perception::frames::FrameGraph;
use kitcell_perception::pose::{Pose, Quaternion, Vec3};
use kitcell_types::{
    AgvId, AgvLocation, CellError, CompetitionState, GripperState, GripperType, ToolFamily,
    ToolStation,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{
    CartesianPath, FrameResolver, FulfillmentService, GripperController, JointTarget,
    MotionBackend, MotionLimits, SceneRegistry, SessionService, ToolChanger,
};

/// Joint whose value moves the robot along its rail.
const RAIL_JOINT: &str = "linear_actuator_joint";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Outbound calls that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimService {
    Plan,
    CartesianPath,
    Execute,
    Gripper,
    ToolChange,
    MoveDestination,
    QualityCheck,
    Submit,
    StartCompetition,
    EndCompetition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub coverage: f64,
    pub attach_after_probes: Option<usize>,
    pub agv_travel_ms: Option<u64>,
    pub quality_passes: bool,
    pub initial_gripper: GripperType,
    pub failing: HashSet<SimService>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            coverage: 1.0,
            attach_after_probes: Some(0),
            agv_travel_ms: Some(20),
            quality_passes: true,
            initial_gripper: GripperType::PartGripper,
            failing: HashSet::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command log
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    PlanAndExecute(JointTarget),
    ComputeCartesianPath { waypoints: Vec<Pose>, eef_step: f64 },
    ExecuteTrajectory { waypoints: Vec<Pose>, limits: MotionLimits },
    SetGripper(bool),
    ToolChange { station: ToolStation, family: ToolFamily },
    RegisterObject { name: String, mesh: String },
    Attach(String),
    Detach(String),
    MoveDestination { agv: AgvId, target: AgvLocation },
    QualityCheck(String),
    Submit(String),
    StartCompetition,
    EndCompetition,
}

// ─────────────────────────────────────────────────────────────────────────────
// SimCell
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Arm {
    pose: Pose,
    gripper: GripperState,
    probes_while_enabled: usize,
}

#[derive(Debug)]
pub struct SimCell {
    store: StateStore,
    config: SimConfig,
    frames: FrameGraph,
    named_poses: HashMap<String, Pose>,
    arm: Mutex<Arm>,
    log: Mutex<Vec<SimCommand>>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimCell {
    pub fn builder(store: StateStore) -> SimCellBuilder {
        SimCellBuilder {
            store,
            config: SimConfig::default(),
            frames: standard_frames(),
            named_poses: HashMap::from([(
                "home".to_string(),
                Pose::new(Vec3::new(-0.6, 0.0, 1.4), Quaternion::identity()),
            )]),
            start_pose: Pose::new(Vec3::new(0.0, 0.0, 1.4), Quaternion::identity()),
        }
    }

    /// Every call issued so far, oldest first.
    pub fn commands(&self) -> Vec<SimCommand> {
        locked(&self.log).clone()
    }

    pub fn submissions(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                SimCommand::Submit(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn tool_changes(&self) -> Vec<(ToolStation, ToolFamily)> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                SimCommand::ToolChange { station, family } => Some((station, family)),
                _ => None,
            })
            .collect()
    }

    /// Waypoint lists of every executed trajectory.
    pub fn executed_paths(&self) -> Vec<Vec<Pose>> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                SimCommand::ExecuteTrajectory { waypoints, .. } => Some(waypoints),
                _ => None,
            })
            .collect()
    }

    pub fn pose(&self) -> Pose {
        locked(&self.arm).pose
    }

    fn record(&self, command: SimCommand) {
        debug!(?command, "sim command");
        locked(&self.log).push(command);
    }

    fn check(&self, service: SimService) -> Result<(), CellError> {
        if self.config.failing.contains(&service) {
            Err(CellError::service(
                format!("{service:?}").to_lowercase(),
                "injected failure",
            ))
        } else {
            Ok(())
        }
    }

    fn publish_gripper(&self, state: GripperState) {
        self.store.update_gripper(state);
    }
}

pub struct SimCellBuilder {
    store: StateStore,
    config: SimConfig,
    frames: FrameGraph,
    named_poses: HashMap<String, Pose>,
    start_pose: Pose,
}

impl SimCellBuilder {
    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the pre-loaded frames.
    pub fn with_frames(mut self, frames: FrameGraph) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_frame(mut self, frame: &str, world_pose: Pose) -> Self {
        self.frames.set_world_pose(frame, world_pose);
        self
    }

    pub fn with_named_pose(mut self, name: impl Into<String>, pose: Pose) -> Self {
        self.named_poses.insert(name.into(), pose);
        self
    }

    pub fn with_start_pose(mut self, pose: Pose) -> Self {
        self.start_pose = pose;
        self
    }

    /// Publish the initial gripper and AGV state and return the shared cell.
    pub fn build(self) -> Arc<SimCell> {
        let gripper = GripperState {
            attached: false,
            enabled: false,
            gripper_type: self.config.initial_gripper,
        };
        self.store.update_gripper(gripper);
        for n in 1..=4 {
            if let Ok(agv) = AgvId::new(n) {
                self.store.update_agv(agv, AgvLocation::Kitting);
            }
        }
        Arc::new(SimCell {
            store: self.store,
            config: self.config,
            frames: self.frames,
            named_poses: self.named_poses,
            arm: Mutex::new(Arm {
                pose: self.start_pose,
                gripper,
                probes_while_enabled: 0,
            }),
            log: Mutex::new(Vec::new()),
        })
    }
}

/// Static frames of the standard kitting cell.
pub fn standard_frames() -> FrameGraph {
    let mut frames = FrameGraph::new();
    for (n, y) in [(1u8, 4.8), (2, 1.2), (3, -1.2), (4, -4.8)] {
        frames.set_world_pose(&format!("agv{n}"), Pose::from_xyz_yaw(-2.1, y, 0.0, 0.0));
        frames.set_transform(
            &format!("agv{n}"),
            &format!("agv{n}_tray"),
            Pose::from_xyz_yaw(-0.165, 0.0, 0.75, 0.0),
        );
    }
    for (station, y) in [(ToolStation::Kts1, -5.84), (ToolStation::Kts2, 5.84)] {
        let table = format!("{station}_table");
        frames.set_world_pose(&table, Pose::from_xyz_yaw(-1.3, y, 0.0, 0.0));
        for (family, dy) in [(ToolFamily::Parts, 0.3), (ToolFamily::Trays, -0.3)] {
            frames.set_transform(
                &table,
                &station.tool_changer_frame(family),
                Pose::from_xyz_yaw(0.0, dy, 1.011, 0.0),
            );
        }
    }
    frames
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait implementations
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl MotionBackend for SimCell {
    async fn plan_and_execute(&self, target: &JointTarget) -> Result<(), CellError> {
        self.record(SimCommand::PlanAndExecute(target.clone()));
        self.check(SimService::Plan)?;
        let mut arm = locked(&self.arm);
        match target {
            JointTarget::Named(name) => {
                let pose = self
                    .named_poses
                    .get(name)
                    .ok_or_else(|| CellError::MotionFailed(format!("unknown named target '{name}'")))?;
                arm.pose = *pose;
            }
            JointTarget::Joints(joints) => {
                if let Some(rail) = joints.get(RAIL_JOINT) {
                    arm.pose.position.y = -rail;
                }
            }
        }
        Ok(())
    }

    async fn compute_cartesian_path(
        &self,
        waypoints: &[Pose],
        eef_step: f64,
    ) -> Result<CartesianPath, CellError> {
        self.record(SimCommand::ComputeCartesianPath {
            waypoints: waypoints.to_vec(),
            eef_step,
        });
        self.check(SimService::CartesianPath)?;
        let covered = ((waypoints.len() as f64) * self.config.coverage).ceil() as usize;
        Ok(CartesianPath {
            waypoints: waypoints[..covered.min(waypoints.len())].to_vec(),
            fraction: self.config.coverage,
        })
    }

    async fn execute_trajectory(
        &self,
        path: &CartesianPath,
        limits: MotionLimits,
    ) -> Result<(), CellError> {
        self.record(SimCommand::ExecuteTrajectory {
            waypoints: path.waypoints.clone(),
            limits,
        });
        self.check(SimService::Execute)?;

        let mut arm = locked(&self.arm);
        if let Some(last) = path.waypoints.last() {
            arm.pose = *last;
        }
        if arm.gripper.enabled && !arm.gripper.attached {
            arm.probes_while_enabled += 1;
            if self
                .config
                .attach_after_probes
                .is_some_and(|n| arm.probes_while_enabled >= n)
            {
                arm.gripper.attached = true;
                self.publish_gripper(arm.gripper);
            }
        }
        Ok(())
    }

    async fn current_pose(&self) -> Result<Pose, CellError> {
        Ok(locked(&self.arm).pose)
    }
}

#[async_trait]
impl FrameResolver for SimCell {
    async fn world_pose_of(&self, frame: &str) -> Result<Pose, CellError> {
        self.frames
            .world_pose(frame)
            .ok_or_else(|| CellError::TransformUnavailable(frame.to_string()))
    }
}

#[async_trait]
impl GripperController for SimCell {
    async fn set_enabled(&self, enable: bool) -> Result<(), CellError> {
        self.record(SimCommand::SetGripper(enable));
        self.check(SimService::Gripper)?;

        let mut arm = locked(&self.arm);
        arm.gripper.enabled = enable;
        arm.probes_while_enabled = 0;
        if enable {
            if self.config.attach_after_probes == Some(0) {
                arm.gripper.attached = true;
            }
        } else {
            arm.gripper.attached = false;
        }
        self.publish_gripper(arm.gripper);
        Ok(())
    }
}

#[async_trait]
impl ToolChanger for SimCell {
    async fn request_change(
        &self,
        station: ToolStation,
        family: ToolFamily,
    ) -> Result<(), CellError> {
        self.record(SimCommand::ToolChange { station, family });
        self.check(SimService::ToolChange)?;

        let mut arm = locked(&self.arm);
        arm.gripper.gripper_type = family.gripper_type();
        self.publish_gripper(arm.gripper);
        Ok(())
    }
}

impl SceneRegistry for SimCell {
    fn register_object(&self, name: &str, mesh: &str, _pose: Pose) {
        self.record(SimCommand::RegisterObject {
            name: name.to_string(),
            mesh: mesh.to_string(),
        });
    }

    fn attach(&self, name: &str) {
        self.record(SimCommand::Attach(name.to_string()));
    }

    fn detach(&self, name: &str) {
        self.record(SimCommand::Detach(name.to_string()));
    }
}

#[async_trait]
impl FulfillmentService for SimCell {
    async fn move_destination(&self, agv: AgvId, target: AgvLocation) -> Result<(), CellError> {
        self.record(SimCommand::MoveDestination { agv, target });
        self.check(SimService::MoveDestination)?;

        self.store.update_agv(agv, AgvLocation::Unknown);
        if let Some(ms) = self.config.agv_travel_ms {
            let store = self.store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                info!(%agv, %target, "agv arrived");
                store.update_agv(agv, target);
            });
        }
        Ok(())
    }

    async fn perform_quality_check(&self, order_id: &str) -> Result<bool, CellError> {
        self.record(SimCommand::QualityCheck(order_id.to_string()));
        self.check(SimService::QualityCheck)?;
        Ok(self.config.quality_passes)
    }

    async fn submit(&self, order_id: &str) -> Result<(), CellError> {
        self.record(SimCommand::Submit(order_id.to_string()));
        self.check(SimService::Submit)
    }
}

#[async_trait]
impl SessionService for SimCell {
    async fn start_competition(&self) -> Result<(), CellError> {
        self.record(SimCommand::StartCompetition);
        self.check(SimService::StartCompetition)?;
        self.store.set_competition(CompetitionState::Started);
        Ok(())
    }

    async fn end_competition(&self) -> Result<(), CellError> {
        self.record(SimCommand::EndCompetition);
        self.check(SimService::EndCompetition)?;
        self.store.set_competition(CompetitionState::Ended);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn path(z: &[f64]) -> CartesianPath {
        CartesianPath {
            waypoints: z.iter().map(|z| Pose::from_xyz_yaw(0.0, 0.0, *z, 0.0)).collect(),
            fraction: 1.0,
        }
    }

    #[tokio::test]
    async fn enabling_attaches_immediately_by_default() {
        let store = StateStore::new();
        let cell = SimCell::builder(store.clone()).build();
        cell.set_enabled(true).await.unwrap();
        assert!(store.gripper().attached);
        cell.set_enabled(false).await.unwrap();
        assert!(!store.gripper().attached);
    }

    #[tokio::test]
    async fn attach_after_probes_counts_enabled_trajectories() {
        let store = StateStore::new();
        let cell = SimCell::builder(store.clone())
            .with_config(SimConfig {
                attach_after_probes: Some(2),
                ..SimConfig::default()
            })
            .build();

        cell.execute_trajectory(&path(&[1.0]), MotionLimits::new(0.1, 0.1))
            .await
            .unwrap();
        cell.set_enabled(true).await.unwrap();
        cell.execute_trajectory(&path(&[0.9]), MotionLimits::new(0.1, 0.1))
            .await
            .unwrap();
        assert!(!store.gripper().attached);
        cell.execute_trajectory(&path(&[0.8]), MotionLimits::new(0.1, 0.1))
            .await
            .unwrap();
        assert!(store.gripper().attached);
        assert!((cell.pose().position.z - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn partial_coverage_truncates_path() {
        let store = StateStore::new();
        let cell = SimCell::builder(store)
            .with_config(SimConfig {
                coverage: 0.5,
                ..SimConfig::default()
            })
            .build();
        let waypoints = path(&[1.0, 0.5]).waypoints;
        let planned = cell.compute_cartesian_path(&waypoints, 0.01).await.unwrap();
        assert_eq!(planned.waypoints.len(), 1);
        assert!((planned.fraction - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn tool_change_updates_gripper_type() {
        let store = StateStore::new();
        let cell = SimCell::builder(store.clone()).build();
        assert_eq!(store.gripper().gripper_type, GripperType::PartGripper);
        cell.request_change(ToolStation::Kts1, ToolFamily::Trays)
            .await
            .unwrap();
        assert_eq!(store.gripper().gripper_type, GripperType::TrayGripper);
        assert_eq!(cell.tool_changes(), vec![(ToolStation::Kts1, ToolFamily::Trays)]);
    }

    #[tokio::test]
    async fn agv_arrives_after_travel() {
        let store = StateStore::new();
        let cell = SimCell::builder(store.clone()).build();
        let agv = AgvId::new(2).unwrap();
        assert_eq!(store.agv_location(agv), AgvLocation::Kitting);

        cell.move_destination(agv, AgvLocation::Warehouse).await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(1),
            store.wait_for_agv(agv, AgvLocation::Warehouse),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn injected_failures_surface_as_service_errors() {
        let store = StateStore::new();
        let cell = SimCell::builder(store)
            .with_config(SimConfig {
                failing: HashSet::from([SimService::Submit]),
                ..SimConfig::default()
            })
            .build();
        let err = cell.submit("o1").await.unwrap_err();
        assert!(matches!(err, CellError::ServiceCall { .. }));
        assert_eq!(cell.submissions(), vec!["o1".to_string()]);
    }

    #[tokio::test]
    async fn frames_resolve_agv_trays() {
        let store = StateStore::new();
        let cell = SimCell::builder(store).build();
        let tray = cell.world_pose_of("agv2_tray").await.unwrap();
        assert!((tray.position.y - 1.2).abs() < 1e-9);
        assert!((tray.position.z - 0.75).abs() < 1e-9);
        assert!(matches!(
            cell.world_pose_of("agv9_tray").await,
            Err(CellError::TransformUnavailable(_))
        ));
        assert!(cell.world_pose_of("kts2_tool_changer_parts_frame").await.is_ok());
    }

    #[tokio::test]
    async fn rail_moves_shift_the_tool() {
        let store = StateStore::new();
        let cell = SimCell::builder(store).build();
        let joints = BTreeMap::from([(RAIL_JOINT.to_string(), -1.2)]);
        cell.plan_and_execute(&JointTarget::Joints(joints)).await.unwrap();
        assert!((cell.pose().position.y - 1.2).abs() < 1e-9);
        assert!(cell
            .plan_and_execute(&JointTarget::Named("nowhere".into()))
            .await
            .is_err());
    }
}
