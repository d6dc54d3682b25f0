//! Scenario files for simulated sessions.
//!
//! A scenario describes what the inbound feeds will report during a run:
//! parts in the bins, trays on the kit-tray tables, orders and when they are
//! announced, and when the competition moves between phases.
//!
//! ```toml
//! [timeline]
//! ready_after_ms = 50
//! announcements_done_after_ms = 200
//!
//! [[bins]]
//! side = "right_bins"
//! part = { type = "gear", color = "red" }
//! pose = { position = { x = -1.9, y = -3.0, z = 0.72 } }
//!
//! [[orders]]
//! at_ms = 100
//! [orders.order]
//! id = "o1"
//! [orders.order.task]
//! type = "kitting"
//! agv = 2
//! destination = "warehouse"
//! parts = [{ part = { type = "gear", color = "red" }, quadrant = 1 }]
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use kitcell_hal::SimConfig;
use kitcell_middleware::StateStore;
use kitcell_perception::cache::{PartDetection, PerceptionSnapshot, SensorId, TrayDetection};
use kitcell_perception::pose::Pose;
use kitcell_runtime::CellCommand;
use kitcell_types::{BinSide, CellError, CompetitionState, Order, Part, ToolStation};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Reference run: one red gear from the right bins into quadrant 1 of AGV 2.
pub const DEFAULT_SCENARIO: &str = include_str!("../scenarios/single_gear.toml");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeline {
    pub ready_after_ms: u64,
    /// `None`: announcements never finish and the run ends on `end_after_ms`
    /// or Ctrl-C.
    pub announcements_done_after_ms: Option<u64>,
    pub end_after_ms: Option<u64>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            ready_after_ms: 50,
            announcements_done_after_ms: Some(200),
            end_after_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinSighting {
    pub side: BinSide,
    pub part: Part,
    pub pose: Pose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraySighting {
    pub station: ToolStation,
    pub tray_id: u8,
    pub pose: Pose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledOrder {
    /// Delay after competition start before the order is announced.
    #[serde(default)]
    pub at_ms: u64,
    pub order: Order,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub sim: SimConfig,
    pub timeline: Timeline,
    pub bins: Vec<BinSighting>,
    pub trays: Vec<TraySighting>,
    pub orders: Vec<ScheduledOrder>,
    /// Issued through the command surface before the session starts.
    pub commands: Vec<CellCommand>,
}

impl Scenario {
    pub fn parse(raw: &str) -> Result<Self, CellError> {
        toml::from_str(raw).map_err(|e| CellError::Config(format!("invalid scenario: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, CellError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            CellError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    /// Publish one snapshot per camera that sees something.
    pub fn apply_perception(&self, store: &StateStore) {
        let mut snapshots: HashMap<SensorId, PerceptionSnapshot> = HashMap::new();

        for b in &self.bins {
            let sensor = match b.side {
                BinSide::LeftBins => SensorId::LeftBinsCamera,
                BinSide::RightBins => SensorId::RightBinsCamera,
            };
            snapshots.entry(sensor).or_default().parts.push(PartDetection {
                pose: b.pose,
                part: b.part,
            });
        }
        for t in &self.trays {
            let sensor = match t.station {
                ToolStation::Kts1 => SensorId::Kts1Camera,
                ToolStation::Kts2 => SensorId::Kts2Camera,
            };
            snapshots.entry(sensor).or_default().trays.push(TrayDetection {
                pose: t.pose,
                tray_id: t.tray_id,
            });
        }

        for (sensor, snapshot) in snapshots {
            debug!(?sensor, parts = snapshot.parts.len(), trays = snapshot.trays.len(), "snapshot");
            store.update_perception(sensor, snapshot);
        }
    }

    /// Play the competition timeline and order announcements into `store`.
    pub fn spawn_feeds(&self, store: StateStore) -> JoinHandle<()> {
        let timeline = self.timeline.clone();
        let mut orders = self.orders.clone();
        orders.sort_by_key(|o| o.at_ms);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeline.ready_after_ms)).await;
            store.set_competition(CompetitionState::Ready);
            if store
                .wait_for_competition(|s| s != CompetitionState::Ready)
                .await
                .is_err()
            {
                return;
            }
            let started = tokio::time::Instant::now();

            let mut marks: Vec<(u64, Mark)> = orders
                .into_iter()
                .map(|o| (o.at_ms, Mark::Order(o.order)))
                .collect();
            if let Some(ms) = timeline.announcements_done_after_ms {
                marks.push((ms, Mark::AnnouncementsDone));
            }
            if let Some(ms) = timeline.end_after_ms {
                marks.push((ms, Mark::End));
            }
            // Stable: orders announced at the same instant as the done mark
            // still arrive first.
            marks.sort_by_key(|(ms, _)| *ms);

            for (ms, mark) in marks {
                tokio::time::sleep_until(started + Duration::from_millis(ms)).await;
                if store.competition() == CompetitionState::Ended {
                    return;
                }
                match mark {
                    Mark::Order(order) => {
                        info!(order_id = %order.id, "order announced");
                        store.push_order(order);
                    }
                    Mark::AnnouncementsDone => {
                        store.set_competition(CompetitionState::OrderAnnouncementsDone)
                    }
                    Mark::End => store.set_competition(CompetitionState::Ended),
                }
            }
        })
    }
}

enum Mark {
    Order(Order),
    AnnouncementsDone,
    End,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitcell_types::{AgvId, AgvLocation, OrderTask, PartColor, PartType, Quadrant};

    #[test]
    fn bundled_scenario_parses() {
        let s = Scenario::parse(DEFAULT_SCENARIO).unwrap();
        assert_eq!(s.orders.len(), 1);
        let OrderTask::Kitting(task) = &s.orders[0].order.task else {
            panic!("expected a kitting order");
        };
        assert_eq!(task.agv, AgvId::new(2).unwrap());
        assert_eq!(task.destination, AgvLocation::Warehouse);
        assert_eq!(task.parts[0].part, Part::new(PartType::Gear, PartColor::Red));
        assert_eq!(task.parts[0].quadrant, Quadrant::Q1);
        assert_eq!(s.bins[0].side, BinSide::RightBins);
    }

    #[test]
    fn empty_scenario_uses_defaults() {
        let s = Scenario::parse("").unwrap();
        assert_eq!(s, Scenario::default());
        assert_eq!(s.timeline.ready_after_ms, 50);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Scenario::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, CellError::Config(_)));
    }

    #[test]
    fn load_reads_sim_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flaky.toml");
        fs::write(
            &path,
            "[sim]\ncoverage = 0.5\nfailing = [\"submit\"]\n",
        )
        .unwrap();
        let s = Scenario::load(&path).unwrap();
        assert_eq!(s.sim.coverage, 0.5);
        assert!(s.sim.failing.contains(&kitcell_hal::SimService::Submit));
    }

    #[test]
    fn perception_is_grouped_per_camera() {
        let s = Scenario::parse(
            r#"
            [[bins]]
            side = "left_bins"
            part = { type = "pump", color = "blue" }
            pose = { position = { x = -1.9, y = 3.0, z = 0.72 } }

            [[bins]]
            side = "left_bins"
            part = { type = "sensor", color = "green" }
            pose = { position = { x = -2.6, y = 3.0, z = 0.72 } }

            [[trays]]
            station = "kts2"
            tray_id = 5
            pose = { position = { x = -0.87, y = 5.84, z = 0.73 } }
            "#,
        )
        .unwrap();
        let store = StateStore::new();
        s.apply_perception(&store);

        assert!(store.has_perception(SensorId::LeftBinsCamera));
        assert!(!store.has_perception(SensorId::RightBinsCamera));
        assert!(store.locate_part(Part::new(PartType::Pump, PartColor::Blue)).is_some());
        assert!(store.locate_part(Part::new(PartType::Sensor, PartColor::Green)).is_some());
        assert_eq!(store.locate_tray(5).unwrap().station, ToolStation::Kts2);
    }

    #[tokio::test]
    async fn feeds_follow_the_timeline() {
        let mut s = Scenario::parse(DEFAULT_SCENARIO).unwrap();
        s.timeline = Timeline {
            ready_after_ms: 0,
            announcements_done_after_ms: Some(5),
            end_after_ms: None,
        };
        let store = StateStore::new();
        let handle = s.spawn_feeds(store.clone());

        store
            .wait_for_competition(|c| c == CompetitionState::Ready)
            .await
            .unwrap();
        store.set_competition(CompetitionState::Started);
        handle.await.unwrap();

        assert_eq!(store.competition(), CompetitionState::OrderAnnouncementsDone);
        assert_eq!(store.pending_orders(), 1);
    }
}
