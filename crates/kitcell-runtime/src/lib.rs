//! `kitcell-runtime` – the cell's control loop.
//!
//! # Layers
//!
//! | Module | Role |
//! |---|---|
//! | [`config`] | `CellConfig`: geometry, clearances, layout, motion scaling, attach tuning. |
//! | [`waypoints`] | Pure pose arithmetic for every approach, grasp and retreat. |
//! | [`motion`] | Cartesian motion gate with the coverage threshold. |
//! | [`attach`] | Bounded probe-and-wait loop confirming a grasp. |
//! | [`sequencer`] | Pick / place / removal / tray actions and the held-object model. |
//! | [`agv`] | AGV location waits and staged-tray bookkeeping. |
//! | [`orders`] | Order queue state machine. |
//! | [`session`] | Competition start / end around the order loop. |
//! | [`commands`] | mpsc request/reply surface over the shared sequencer. |
//! | [`scene`] | Static furniture for the collision scene. |
//! | [`telemetry`] | `tracing` subscriber and optional OTLP export. |
//!
//! Physical actions are serialised by a single `tokio::sync::Mutex` around
//! the [`sequencer::PickPlaceSequencer`]; inbound feeds are applied to the
//! [`kitcell_middleware::StateStore`] independently.

pub mod agv;
pub mod attach;
pub mod commands;
pub mod config;
pub mod motion;
pub mod orders;
pub mod scene;
pub mod sequencer;
pub mod session;
pub mod telemetry;
pub mod waypoints;

pub use commands::{CellCommand, CommandClient, CommandReply, CommandServer, command_channel};
pub use config::CellConfig;
pub use orders::{OrderProcessor, OrderReport, SessionOutcome, SharedSequencer};
pub use sequencer::{HeldObject, PickPlaceSequencer};
pub use session::run_session;
