//! Collaborator traits.
//!
//! | Trait | Outbound calls |
//! |---|---|
//! | [`MotionBackend`] | joint-space moves, Cartesian path computation and execution |
//! | [`FrameResolver`] | world pose of a named frame |
//! | [`GripperController`] | enable / disable the vacuum gripper |
//! | [`ToolChanger`] | swap between part and tray grippers at a station |
//! | [`SceneRegistry`] | collision-scene bookkeeping (fire-and-forget) |
//! | [`FulfillmentService`] | AGV moves, quality checks, order submission |
//! | [`SessionService`] | start / end the competition |
//!
//! Every awaited call is a single suspension point; callers never issue two
//! of them concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kitcell_perception::pose::Pose;
use kitcell_types::{AgvId, AgvLocation, CellError, ToolFamily, ToolStation};
use serde::{Deserialize, Serialize};

/// Goal for a joint-space move.
#[derive(Debug, Clone, PartialEq)]
pub enum JointTarget {
    /// A pose stored by the planner, e.g. `"home"`.
    Named(String),
    /// Partial joint assignment; joints not listed keep their value.
    Joints(BTreeMap<String, f64>),
}

/// Velocity and acceleration scaling applied when retiming a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionLimits {
    pub velocity_scale: f64,
    pub accel_scale: f64,
}

impl MotionLimits {
    pub const fn new(velocity_scale: f64, accel_scale: f64) -> Self {
        Self {
            velocity_scale,
            accel_scale,
        }
    }
}

/// Result of Cartesian interpolation. `fraction` is the share of the
/// requested waypoints the planner could follow.
#[derive(Debug, Clone, PartialEq)]
pub struct CartesianPath {
    pub waypoints: Vec<Pose>,
    pub fraction: f64,
}

#[async_trait]
pub trait MotionBackend: Send + Sync {
    async fn plan_and_execute(&self, target: &JointTarget) -> Result<(), CellError>;

    async fn compute_cartesian_path(
        &self,
        waypoints: &[Pose],
        eef_step: f64,
    ) -> Result<CartesianPath, CellError>;

    async fn execute_trajectory(
        &self,
        path: &CartesianPath,
        limits: MotionLimits,
    ) -> Result<(), CellError>;

    async fn current_pose(&self) -> Result<Pose, CellError>;
}

#[async_trait]
pub trait FrameResolver: Send + Sync {
    /// Fails with [`CellError::TransformUnavailable`] when `frame` cannot be
    /// resolved right now.
    async fn world_pose_of(&self, frame: &str) -> Result<Pose, CellError>;
}

#[async_trait]
pub trait GripperController: Send + Sync {
    async fn set_enabled(&self, enable: bool) -> Result<(), CellError>;
}

#[async_trait]
pub trait ToolChanger: Send + Sync {
    async fn request_change(&self, station: ToolStation, family: ToolFamily)
    -> Result<(), CellError>;
}

/// Visualisation / collision bookkeeping. Nothing the sequencer decides
/// depends on these calls, so they do not report errors.
pub trait SceneRegistry: Send + Sync {
    fn register_object(&self, name: &str, mesh: &str, pose: Pose);
    fn attach(&self, name: &str);
    fn detach(&self, name: &str);
}

#[async_trait]
pub trait FulfillmentService: Send + Sync {
    async fn move_destination(&self, agv: AgvId, target: AgvLocation) -> Result<(), CellError>;

    /// `Ok(false)` means the check ran and flagged an issue.
    async fn perform_quality_check(&self, order_id: &str) -> Result<bool, CellError>;

    async fn submit(&self, order_id: &str) -> Result<(), CellError>;
}

#[async_trait]
pub trait SessionService: Send + Sync {
    async fn start_competition(&self) -> Result<(), CellError>;
    async fn end_competition(&self) -> Result<(), CellError>;
}

/// Every collaborator the runtime needs, behind shared trait objects.
#[derive(Clone)]
pub struct CellBackends {
    pub motion: Arc<dyn MotionBackend>,
    pub frames: Arc<dyn FrameResolver>,
    pub gripper: Arc<dyn GripperController>,
    pub tool_changer: Arc<dyn ToolChanger>,
    pub scene: Arc<dyn SceneRegistry>,
    pub fulfillment: Arc<dyn FulfillmentService>,
    pub session: Arc<dyn SessionService>,
}

impl CellBackends {
    /// Use one object for every collaborator, as the simulated cell does.
    pub fn uniform<T>(cell: Arc<T>) -> Self
    where
        T: MotionBackend
            + FrameResolver
            + GripperController
            + ToolChanger
            + SceneRegistry
            + FulfillmentService
            + SessionService
            + 'static,
    {
        Self {
            motion: cell.clone(),
            frames: cell.clone(),
            gripper: cell.clone(),
            tool_changer: cell.clone(),
            scene: cell.clone(),
            fulfillment: cell.clone(),
            session: cell,
        }
    }
}
