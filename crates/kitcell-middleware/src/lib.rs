//! `kitcell-middleware` – plumbing between the inbound feeds and the control
//! loop.
//!
//! # Modules
//!
//! - [`bus`] – topic-partitioned broadcast bus for outbound cell events.
//! - [`store`] – [`StateStore`]: single-writer shared caches (perception,
//!   gripper, orders, AGV locations, competition state) with
//!   block-until-predicate waits for the sequencing side.

pub mod bus;
pub mod store;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use store::StateStore;
