//! Inbound shared-state store.
//!
//! Each feed (perception, gripper, orders, AGV locations, competition phase)
//! owns one [`tokio::sync::watch`] channel.  The inbound side replaces or
//! modifies the value atomically; the sequencing side reads the latest value
//! or awaits a predicate without polling.
//!
//! ```rust
//! # async fn demo() -> Result<(), kitcell_types::CellError> {
//! use kitcell_middleware::StateStore;
//! use kitcell_types::CompetitionState;
//!
//! let store = StateStore::new();
//! let waiter = {
//!     let store = store.clone();
//!     tokio::spawn(async move { store.wait_for_competition(|s| s == CompetitionState::Ready).await })
//! };
//! store.set_competition(CompetitionState::Ready);
//! waiter.await.unwrap()?;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use kitcell_perception::cache::{PartSighting, PerceptionCache, PerceptionSnapshot, SensorId, TraySighting};
use kitcell_types::{
    AgvId, AgvLocation, AgvStatusBoard, CellError, CompetitionState, GripperState, Order, Part,
};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug)]
struct Feeds {
    perception: watch::Sender<PerceptionCache>,
    gripper: watch::Sender<GripperState>,
    orders: watch::Sender<VecDeque<Order>>,
    agvs: watch::Sender<AgvStatusBoard>,
    competition: watch::Sender<CompetitionState>,
}

/// Shared handle; clones see the same feeds.
#[derive(Debug, Clone)]
pub struct StateStore {
    feeds: Arc<Feeds>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn closed(feed: &str) -> CellError {
    CellError::Channel(format!("{feed} feed closed"))
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            feeds: Arc::new(Feeds {
                perception: watch::channel(PerceptionCache::new()).0,
                gripper: watch::channel(GripperState::default()).0,
                orders: watch::channel(VecDeque::new()).0,
                agvs: watch::channel(AgvStatusBoard::default()).0,
                competition: watch::channel(CompetitionState::default()).0,
            }),
        }
    }

    // ── Perception ──────────────────────────────────────────────────────────

    pub fn update_perception(&self, sensor: SensorId, snapshot: PerceptionSnapshot) {
        self.feeds
            .perception
            .send_modify(|cache| cache.update(sensor, snapshot));
    }

    pub fn locate_part(&self, part: Part) -> Option<PartSighting> {
        self.feeds.perception.borrow().locate_part(part)
    }

    pub fn locate_tray(&self, tray_id: u8) -> Option<TraySighting> {
        self.feeds.perception.borrow().locate_tray(tray_id)
    }

    pub fn has_perception(&self, sensor: SensorId) -> bool {
        self.feeds.perception.borrow().has_data(sensor)
    }

    // ── Gripper ─────────────────────────────────────────────────────────────

    pub fn update_gripper(&self, state: GripperState) {
        self.feeds.gripper.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    pub fn gripper(&self) -> GripperState {
        *self.feeds.gripper.borrow()
    }

    pub async fn wait_for_gripper(
        &self,
        mut pred: impl FnMut(&GripperState) -> bool,
    ) -> Result<GripperState, CellError> {
        let mut rx = self.feeds.gripper.subscribe();
        let state = *rx.wait_for(|s| pred(s)).await.map_err(|_| closed("gripper"))?;
        Ok(state)
    }

    // ── Orders ──────────────────────────────────────────────────────────────

    pub fn push_order(&self, order: Order) {
        debug!(order_id = %order.id, "order queued");
        self.feeds.orders.send_modify(|q| q.push_back(order));
    }

    /// Take the oldest queued order.
    pub fn pop_order(&self) -> Option<Order> {
        let mut taken = None;
        self.feeds.orders.send_if_modified(|q| {
            taken = q.pop_front();
            taken.is_some()
        });
        taken
    }

    pub fn pending_orders(&self) -> usize {
        self.feeds.orders.borrow().len()
    }

    /// Drop everything still queued and hand the dropped orders back.
    pub fn discard_orders(&self) -> Vec<Order> {
        let mut dropped = Vec::new();
        self.feeds.orders.send_if_modified(|q| {
            dropped.extend(q.drain(..));
            !dropped.is_empty()
        });
        dropped
    }

    /// Resolve once at least one order is queued.
    pub async fn wait_for_order(&self) -> Result<(), CellError> {
        let mut rx = self.feeds.orders.subscribe();
        rx.wait_for(|q| !q.is_empty())
            .await
            .map(|_| ())
            .map_err(|_| closed("order"))
    }

    // ── AGVs ────────────────────────────────────────────────────────────────

    pub fn update_agv(&self, agv: AgvId, location: AgvLocation) {
        self.feeds.agvs.send_if_modified(|board| {
            let changed = board.location(agv) != location;
            board.set_location(agv, location);
            changed
        });
    }

    pub fn agv_location(&self, agv: AgvId) -> AgvLocation {
        self.feeds.agvs.borrow().location(agv)
    }

    pub async fn wait_for_agv(&self, agv: AgvId, location: AgvLocation) -> Result<(), CellError> {
        let mut rx = self.feeds.agvs.subscribe();
        rx.wait_for(|board| board.location(agv) == location)
            .await
            .map(|_| ())
            .map_err(|_| closed("agv status"))
    }

    // ── Competition ─────────────────────────────────────────────────────────

    pub fn set_competition(&self, state: CompetitionState) {
        let previous = self.feeds.competition.send_replace(state);
        if previous != state {
            debug!(?previous, current = ?state, "competition state changed");
        }
    }

    pub fn competition(&self) -> CompetitionState {
        *self.feeds.competition.borrow()
    }

    pub async fn wait_for_competition(
        &self,
        mut pred: impl FnMut(CompetitionState) -> bool,
    ) -> Result<CompetitionState, CellError> {
        let mut rx = self.feeds.competition.subscribe();
        let state = *rx
            .wait_for(|s| pred(*s))
            .await
            .map_err(|_| closed("competition"))?;
        Ok(state)
    }

    /// Resolves when the competition reports `Ended`.  Used as the abort arm
    /// of every long wait in the order loop.
    pub async fn session_ended(&self) {
        // The sender lives as long as `self`, so the wait cannot fail here.
        let _ = self
            .wait_for_competition(|s| s == CompetitionState::Ended)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitcell_perception::cache::PartDetection;
    use kitcell_perception::pose::Pose;
    use kitcell_types::{GripperType, KittingTask, PartColor, PartType};
    use std::time::Duration;

    fn order(id: &str) -> Order {
        Order::kitting(
            id,
            KittingTask {
                agv: AgvId::new(1).unwrap(),
                destination: AgvLocation::Warehouse,
                tray_id: None,
                parts: vec![],
            },
        )
    }

    #[test]
    fn orders_are_fifo() {
        let store = StateStore::new();
        store.push_order(order("a"));
        store.push_order(order("b"));
        assert_eq!(store.pending_orders(), 2);
        assert_eq!(store.pop_order().unwrap().id, "a");
        assert_eq!(store.pop_order().unwrap().id, "b");
        assert!(store.pop_order().is_none());
    }

    #[test]
    fn discard_returns_dropped_orders() {
        let store = StateStore::new();
        store.push_order(order("a"));
        store.push_order(order("b"));
        let dropped = store.discard_orders();
        assert_eq!(dropped.len(), 2);
        assert_eq!(store.pending_orders(), 0);
    }

    #[tokio::test]
    async fn wait_for_order_wakes_on_push() {
        let store = StateStore::new();
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.wait_for_order().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        store.push_order(order("late"));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wait_for_agv_returns_immediately_when_already_there() {
        let store = StateStore::new();
        let agv = AgvId::new(2).unwrap();
        store.update_agv(agv, AgvLocation::Warehouse);
        tokio::time::timeout(
            Duration::from_millis(100),
            store.wait_for_agv(agv, AgvLocation::Warehouse),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn wait_for_agv_ignores_other_agvs() {
        let store = StateStore::new();
        let agv2 = AgvId::new(2).unwrap();
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.wait_for_agv(agv2, AgvLocation::Warehouse).await })
        };
        store.update_agv(AgvId::new(3).unwrap(), AgvLocation::Warehouse);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        store.update_agv(agv2, AgvLocation::Warehouse);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn session_ended_resolves_on_ended() {
        let store = StateStore::new();
        store.set_competition(CompetitionState::Started);
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.session_ended().await })
        };
        store.set_competition(CompetitionState::OrderAnnouncementsDone);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        store.set_competition(CompetitionState::Ended);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn gripper_state_is_mirrored() {
        let store = StateStore::new();
        assert_eq!(store.gripper(), GripperState::default());
        let state = GripperState {
            attached: true,
            enabled: true,
            gripper_type: GripperType::PartGripper,
        };
        store.update_gripper(state);
        assert_eq!(store.gripper(), state);
    }

    #[test]
    fn perception_updates_flow_through() {
        let store = StateStore::new();
        let part = Part::new(PartType::Battery, PartColor::Blue);
        assert!(!store.has_perception(SensorId::RightBinsCamera));
        store.update_perception(
            SensorId::RightBinsCamera,
            PerceptionSnapshot {
                parts: vec![PartDetection {
                    pose: Pose::identity(),
                    part,
                }],
                ..Default::default()
            },
        );
        assert!(store.has_perception(SensorId::RightBinsCamera));
        assert!(store.locate_part(part).is_some());
    }
}
