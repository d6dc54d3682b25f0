//! `kitcell-hal` – the cell's external collaborators.
//!
//! The control loop never talks to a motion planner, gripper or fleet
//! service directly; it goes through the traits in [`backend`].  [`sim`]
//! provides an in-process implementation of all of them for tests and the
//! `kitcell` binary.

pub mod backend;
pub mod sim;

pub use backend::{
    CartesianPath, CellBackends, FrameResolver, FulfillmentService, GripperController,
    JointTarget, MotionBackend, MotionLimits, SceneRegistry, SessionService, ToolChanger,
};
pub use sim::{SimCell, SimCommand, SimConfig, SimService, standard_frames};
