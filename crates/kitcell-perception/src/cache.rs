//! Perception Cache.
//!
//! Holds the most recent [`PerceptionSnapshot`] for each of the four cell
//! cameras.  Updates are last-write-wins per sensor and never merged; the
//! `has_data` flag flips on the first update and is never cleared.
//!
//! | Query | Scan order |
//! |---|---|
//! | [`PerceptionCache::locate_part`] | left bins, then right bins |
//! | [`PerceptionCache::locate_tray`] | kit-tray station 1, then station 2 |
//!
//! Detections are stored in the sensor frame and converted to world poses on
//! lookup by composing them onto the snapshot's `sensor_pose`.

use kitcell_types::{BinSide, Part, ToolStation};
use serde::{Deserialize, Serialize};

use crate::pose::Pose;

/// The four fixed cameras feeding the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorId {
    Kts1Camera,
    Kts2Camera,
    LeftBinsCamera,
    RightBinsCamera,
}

impl SensorId {
    pub const ALL: [SensorId; 4] = [
        SensorId::Kts1Camera,
        SensorId::Kts2Camera,
        SensorId::LeftBinsCamera,
        SensorId::RightBinsCamera,
    ];

    fn slot(self) -> usize {
        match self {
            SensorId::Kts1Camera => 0,
            SensorId::Kts2Camera => 1,
            SensorId::LeftBinsCamera => 2,
            SensorId::RightBinsCamera => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrayDetection {
    pub pose: Pose,
    pub tray_id: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartDetection {
    pub pose: Pose,
    pub part: Part,
}

/// One camera message. Detection poses are relative to `sensor_pose`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerceptionSnapshot {
    #[serde(default)]
    pub trays: Vec<TrayDetection>,
    #[serde(default)]
    pub parts: Vec<PartDetection>,
    #[serde(default)]
    pub sensor_pose: Pose,
    #[serde(default)]
    pub has_data: bool,
}

/// A part located in world coordinates, with the bin side that reported it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartSighting {
    pub pose: Pose,
    pub source: BinSide,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraySighting {
    pub pose: Pose,
    pub station: ToolStation,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerceptionCache {
    snapshots: [PerceptionSnapshot; 4],
}

impl PerceptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored snapshot for `sensor` wholesale.
    pub fn update(&mut self, sensor: SensorId, mut snapshot: PerceptionSnapshot) {
        snapshot.has_data = true;
        self.snapshots[sensor.slot()] = snapshot;
    }

    pub fn snapshot(&self, sensor: SensorId) -> &PerceptionSnapshot {
        &self.snapshots[sensor.slot()]
    }

    pub fn has_data(&self, sensor: SensorId) -> bool {
        self.snapshot(sensor).has_data
    }

    /// First bin detection matching `part`, scanning the left bins before the
    /// right bins.
    pub fn locate_part(&self, part: Part) -> Option<PartSighting> {
        [
            (SensorId::LeftBinsCamera, BinSide::LeftBins),
            (SensorId::RightBinsCamera, BinSide::RightBins),
        ]
        .into_iter()
        .find_map(|(sensor, source)| {
            let snap = self.snapshot(sensor);
            snap.parts
                .iter()
                .find(|d| d.part == part)
                .map(|d| PartSighting {
                    pose: snap.sensor_pose.compose(&d.pose),
                    source,
                })
        })
    }

    /// First tray with `tray_id` on either kit-tray station table.
    pub fn locate_tray(&self, tray_id: u8) -> Option<TraySighting> {
        [
            (SensorId::Kts1Camera, ToolStation::Kts1),
            (SensorId::Kts2Camera, ToolStation::Kts2),
        ]
        .into_iter()
        .find_map(|(sensor, station)| {
            let snap = self.snapshot(sensor);
            snap.trays
                .iter()
                .find(|d| d.tray_id == tray_id)
                .map(|d| TraySighting {
                    pose: snap.sensor_pose.compose(&d.pose),
                    station,
                })
        })
    }
}
