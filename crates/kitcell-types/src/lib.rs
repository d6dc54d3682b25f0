//! `kitcell-types` – shared vocabulary of the kitting cell.
//!
//! Parts, orders, AGV and gripper state, competition phases, the outbound
//! [`Event`] envelope and the workspace-wide [`CellError`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Parts
// ─────────────────────────────────────────────────────────────────────────────

/// Part family. Keys the static height table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartType {
    Battery,
    Pump,
    Sensor,
    Regulator,
    Gear,
}

impl PartType {
    pub fn as_str(self) -> &'static str {
        match self {
            PartType::Battery => "battery",
            PartType::Pump => "pump",
            PartType::Sensor => "sensor",
            PartType::Regulator => "regulator",
            PartType::Gear => "gear",
        }
    }
}

impl fmt::Display for PartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartColor {
    Red,
    Green,
    Blue,
    Orange,
    Purple,
}

impl PartColor {
    pub fn as_str(self) -> &'static str {
        match self {
            PartColor::Red => "red",
            PartColor::Green => "green",
            PartColor::Blue => "blue",
            PartColor::Orange => "orange",
            PartColor::Purple => "purple",
        }
    }
}

impl fmt::Display for PartColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A part is identified only by its `(type, color)` pair; there is no
/// per-instance id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Part {
    #[serde(rename = "type")]
    pub part_type: PartType,
    pub color: PartColor,
}

impl Part {
    pub fn new(part_type: PartType, color: PartColor) -> Self {
        Self { part_type, color }
    }

    /// Name used for the part's scene entry, e.g. `"red_gear"`.
    pub fn scene_name(&self) -> String {
        format!("{}_{}", self.color, self.part_type)
    }

    /// Mesh resource registered alongside the scene entry, e.g. `"gear.stl"`.
    pub fn mesh(&self) -> String {
        format!("{}.stl", self.part_type)
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.color, self.part_type)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trays, quadrants, AGVs
// ─────────────────────────────────────────────────────────────────────────────

/// One of the four fixed placement slots on a kit tray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Quadrant {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl TryFrom<u8> for Quadrant {
    type Error = CellError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Quadrant::Q1),
            2 => Ok(Quadrant::Q2),
            3 => Ok(Quadrant::Q3),
            4 => Ok(Quadrant::Q4),
            other => Err(CellError::InvalidIdentifier(format!("quadrant {other}"))),
        }
    }
}

impl From<Quadrant> for u8 {
    fn from(q: Quadrant) -> Self {
        match q {
            Quadrant::Q1 => 1,
            Quadrant::Q2 => 2,
            Quadrant::Q3 => 3,
            Quadrant::Q4 => 4,
        }
    }
}

impl fmt::Display for Quadrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "quadrant {}", u8::from(*self))
    }
}

/// AGV identifier, always in `1..=4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct AgvId(u8);

impl AgvId {
    pub const COUNT: usize = 4;

    pub fn new(id: u8) -> Result<Self, CellError> {
        Self::try_from(id)
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Frame of the tray mount on top of this AGV, e.g. `"agv2_tray"`.
    pub fn tray_frame(self) -> String {
        format!("agv{}_tray", self.0)
    }

    fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl TryFrom<u8> for AgvId {
    type Error = CellError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (1..=4).contains(&value) {
            Ok(AgvId(value))
        } else {
            Err(CellError::InvalidIdentifier(format!("agv {value}")))
        }
    }
}

impl From<AgvId> for u8 {
    fn from(id: AgvId) -> Self {
        id.0
    }
}

impl fmt::Display for AgvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agv{}", self.0)
    }
}

/// Coarse AGV location as reported by the fleet status feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgvLocation {
    Kitting,
    AssemblyFront,
    AssemblyBack,
    Warehouse,
    #[default]
    Unknown,
}

impl fmt::Display for AgvLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgvLocation::Kitting => "kitting",
            AgvLocation::AssemblyFront => "assembly_front",
            AgvLocation::AssemblyBack => "assembly_back",
            AgvLocation::Warehouse => "warehouse",
            AgvLocation::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Last reported location of every AGV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgvStatusBoard {
    locations: [AgvLocation; AgvId::COUNT],
}

impl AgvStatusBoard {
    pub fn location(&self, agv: AgvId) -> AgvLocation {
        self.locations[agv.index()]
    }

    pub fn set_location(&mut self, agv: AgvId, location: AgvLocation) {
        self.locations[agv.index()] = location;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orders
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KittingPart {
    pub part: Part,
    pub quadrant: Quadrant,
}

/// Assemble `parts` into the quadrants of the tray on `agv`, then send the AGV
/// to `destination`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KittingTask {
    pub agv: AgvId,
    pub destination: AgvLocation,
    /// Tray to stage on the AGV before placing parts, when staging is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tray_id: Option<u8>,
    pub parts: Vec<KittingPart>,
}

/// Work carried by an [`Order`]. Only kitting is executed by the cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OrderTask {
    Kitting(KittingTask),
    Assembly,
    Combined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub task: OrderTask,
}

impl Order {
    pub fn kitting(id: impl Into<String>, task: KittingTask) -> Self {
        Self {
            id: id.into(),
            task: OrderTask::Kitting(task),
        }
    }
}

/// Phase of the competition session, as announced by the session feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionState {
    #[default]
    Idle,
    Ready,
    Started,
    OrderAnnouncementsDone,
    Ended,
}

// ─────────────────────────────────────────────────────────────────────────────
// Gripper and tooling
// ─────────────────────────────────────────────────────────────────────────────

/// Tool family required by an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolFamily {
    Parts,
    Trays,
}

impl ToolFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolFamily::Parts => "parts",
            ToolFamily::Trays => "trays",
        }
    }

    /// Gripper type that is mounted once this family has been changed to.
    pub fn gripper_type(self) -> GripperType {
        match self {
            ToolFamily::Parts => GripperType::PartGripper,
            ToolFamily::Trays => GripperType::TrayGripper,
        }
    }
}

impl fmt::Display for ToolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GripperType {
    PartGripper,
    TrayGripper,
    #[default]
    None,
}

/// Mirror of the external gripper controller's reported state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GripperState {
    pub attached: bool,
    pub enabled: bool,
    pub gripper_type: GripperType,
}

/// Kit-tray station hosting a tool changer and a tray table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStation {
    Kts1,
    Kts2,
}

impl ToolStation {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolStation::Kts1 => "kts1",
            ToolStation::Kts2 => "kts2",
        }
    }

    /// Station on the same side of the cell as a target at lateral `y`.
    pub fn nearest_to(lateral_y: f64) -> Self {
        if lateral_y < 0.0 {
            ToolStation::Kts1
        } else {
            ToolStation::Kts2
        }
    }

    /// Frame of this station's tool-changer slot for `family`, e.g.
    /// `"kts1_tool_changer_parts_frame"`.
    pub fn tool_changer_frame(self, family: ToolFamily) -> String {
        format!("{}_tool_changer_{}_frame", self.as_str(), family.as_str())
    }
}

impl fmt::Display for ToolStation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of the bin area a part was seen in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinSide {
    LeftBins,
    RightBins,
}

impl BinSide {
    pub fn as_str(self) -> &'static str {
        match self {
            BinSide::LeftBins => "left_bins",
            BinSide::RightBins => "right_bins",
        }
    }
}

impl fmt::Display for BinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Phases
// ─────────────────────────────────────────────────────────────────────────────

/// States of one part-placement cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencerPhase {
    Idle,
    LocatingPart,
    ChangingTool,
    Approaching,
    Descending,
    AwaitingAttach,
    Retreating,
    Transporting,
    Releasing,
    Done,
    Failed,
}

/// States of the order-processing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPhase {
    AwaitingFirstOrder,
    ProcessingOrder,
    AwaitingDestinationArrival,
    Submitting,
    Completed,
    Aborted,
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound events
// ─────────────────────────────────────────────────────────────────────────────

/// Envelope for everything the cell publishes to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"kitcell-runtime::sequencer"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    SequencerPhase(SequencerPhase),
    OrderPhase {
        order_id: Option<String>,
        phase: OrderPhase,
    },
    PartPlaced {
        order_id: String,
        part: Part,
        quadrant: Quadrant,
        success: bool,
    },
    QualityChecked {
        order_id: String,
        all_passed: bool,
    },
    OrderSubmitted {
        order_id: String,
        accepted: bool,
    },
    OrderDiscarded {
        order_id: String,
        reason: String,
    },
    SessionFinished {
        success: bool,
    },
    Fault {
        component: String,
        message: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error: every fallible cell operation reports one of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CellError {
    #[error("Perception miss: {0} not found in any snapshot")]
    PerceptionMiss(String),

    #[error("Motion failed: {0}")]
    MotionFailed(String),

    #[error("Cartesian path covers {fraction:.2} of the waypoints (need {threshold:.2})")]
    PathCoverage { fraction: f64, threshold: f64 },

    #[error("Attach not confirmed within {timeout_secs:.1}s")]
    AttachTimeout { timeout_secs: f64 },

    #[error("Transform unavailable for frame '{0}'")]
    TransformUnavailable(String),

    #[error("Service '{service}' failed: {details}")]
    ServiceCall { service: String, details: String },

    #[error("No object attached to the gripper")]
    NothingAttached,

    #[error("An object is still attached to the gripper")]
    AlreadyAttached,

    #[error("Competition ended")]
    SessionEnded,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

impl CellError {
    pub fn service(service: impl Into<String>, details: impl Into<String>) -> Self {
        CellError::ServiceCall {
            service: service.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_scene_name_is_color_then_type() {
        let part = Part::new(PartType::Gear, PartColor::Red);
        assert_eq!(part.scene_name(), "red_gear");
        assert_eq!(part.mesh(), "gear.stl");
    }

    #[test]
    fn agv_id_rejects_out_of_range() {
        assert!(AgvId::new(0).is_err());
        assert!(AgvId::new(5).is_err());
        let agv = AgvId::new(2).unwrap();
        assert_eq!(agv.tray_frame(), "agv2_tray");
    }

    #[test]
    fn quadrant_deserializes_from_integer() {
        let q: Quadrant = serde_json::from_str("3").unwrap();
        assert_eq!(q, Quadrant::Q3);
        assert!(serde_json::from_str::<Quadrant>("7").is_err());
    }

    #[test]
    fn status_board_defaults_to_unknown() {
        let mut board = AgvStatusBoard::default();
        let agv = AgvId::new(4).unwrap();
        assert_eq!(board.location(agv), AgvLocation::Unknown);
        board.set_location(agv, AgvLocation::Warehouse);
        assert_eq!(board.location(agv), AgvLocation::Warehouse);
        assert_eq!(board.location(AgvId::new(1).unwrap()), AgvLocation::Unknown);
    }

    #[test]
    fn station_follows_lateral_sign() {
        assert_eq!(ToolStation::nearest_to(-2.6), ToolStation::Kts1);
        assert_eq!(ToolStation::nearest_to(3.0), ToolStation::Kts2);
        assert_eq!(
            ToolStation::Kts2.tool_changer_frame(ToolFamily::Trays),
            "kts2_tool_changer_trays_frame"
        );
    }

    #[test]
    fn kitting_order_json_shape() {
        let json = r#"{
            "id": "o1",
            "task": {
                "type": "kitting",
                "agv": 2,
                "destination": "warehouse",
                "parts": [{ "part": { "type": "gear", "color": "red" }, "quadrant": 1 }]
            }
        }"#;
        let order: Order = serde_json::from_str(json).unwrap();
        match order.task {
            OrderTask::Kitting(task) => {
                assert_eq!(task.agv.number(), 2);
                assert_eq!(task.destination, AgvLocation::Warehouse);
                assert_eq!(task.tray_id, None);
                assert_eq!(task.parts[0].quadrant, Quadrant::Q1);
            }
            other => panic!("unexpected task {other:?}"),
        }
    }

    #[test]
    fn cell_error_display() {
        let err = CellError::PathCoverage {
            fraction: 0.5,
            threshold: 0.9,
        };
        assert!(err.to_string().contains("0.50"));
        let err = CellError::service("submit_order", "rejected");
        assert!(err.to_string().contains("submit_order"));
    }
}
