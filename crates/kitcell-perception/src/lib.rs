//! `kitcell-perception` – spatial model of the cell.
//!
//! # Modules
//!
//! - [`pose`] – [`Pose`][pose::Pose], [`Vec3`][pose::Vec3] and
//!   [`Quaternion`][pose::Quaternion] with composition and RPY helpers.
//! - [`frames`] – [`FrameGraph`][frames::FrameGraph]: named reference frames
//!   resolved to world poses by walking parent/child edges.
//! - [`cache`] – [`PerceptionCache`][cache::PerceptionCache]: latest snapshot
//!   per sensor plus the part/tray lookups that scan them.

pub mod cache;
pub mod frames;
pub mod pose;
