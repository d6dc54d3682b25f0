//! Cell configuration – reads/writes `~/.kitcell/config.toml`.
//!
//! Every constant the sequencer uses (part heights, clearances, quadrant
//! offsets, rail positions, joint presets, motion scaling, attach timeouts)
//! lives here as data.  All fields default to the standard cell values, so a
//! partial file only needs the entries it changes:
//!
//! ```toml
//! [attach]
//! bin_pick_timeout_secs = 4.0
//!
//! [geometry.part_heights]
//! pump = 0.13
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kitcell_hal::MotionLimits;
use kitcell_perception::pose::Vec3;
use kitcell_types::{AgvId, BinSide, CellError, PartType, Quadrant, ToolStation};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Geometry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartHeights {
    pub battery: f64,
    pub pump: f64,
    pub sensor: f64,
    pub regulator: f64,
    pub gear: f64,
}

impl Default for PartHeights {
    fn default() -> Self {
        Self {
            battery: 0.04,
            pump: 0.12,
            sensor: 0.07,
            regulator: 0.07,
            gear: 0.02,
        }
    }
}

impl PartHeights {
    pub fn of(&self, part_type: PartType) -> f64 {
        match part_type {
            PartType::Battery => self.battery,
            PartType::Pump => self.pump,
            PartType::Sensor => self.sensor,
            PartType::Regulator => self.regulator,
            PartType::Gear => self.gear,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Geometry {
    pub kit_tray_thickness: f64,
    /// Extra depth below the part's top surface at which the gripper grasps.
    pub pick_offset: f64,
    pub drop_height: f64,
    /// Added above the drop height when releasing a part on a tray.
    pub release_margin: f64,
    pub part_heights: PartHeights,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            part_heights: PartHeights::default(),
            kit_tray_thickness: 0.01,
            pick_offset: 0.003,
            drop_height: 0.002,
            release_margin: 0.01,
        }
    }
}

/// Vertical clearances above a target, in metres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Clearances {
    pub pick_approach: f64,
    pub pick_retreat: f64,
    pub place_approach: f64,
    pub tray_approach: f64,
    pub tray_place_approach: f64,
    pub tool_changer_approach: f64,
}

impl Default for Clearances {
    fn default() -> Self {
        Self {
            pick_approach: 0.5,
            pick_retreat: 0.3,
            place_approach: 0.3,
            tray_approach: 0.2,
            tray_place_approach: 0.3,
            tool_changer_approach: 0.4,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Layout
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Offset2 {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadrantOffsets {
    pub q1: Offset2,
    pub q2: Offset2,
    pub q3: Offset2,
    pub q4: Offset2,
}

impl Default for QuadrantOffsets {
    fn default() -> Self {
        Self {
            q1: Offset2 { x: -0.08, y: 0.12 },
            q2: Offset2 { x: 0.08, y: 0.12 },
            q3: Offset2 { x: -0.08, y: -0.12 },
            q4: Offset2 { x: 0.08, y: -0.12 },
        }
    }
}

impl QuadrantOffsets {
    /// Offset of `quadrant` from the tray origin, in the tray frame.
    pub fn of(&self, quadrant: Quadrant) -> Vec3 {
        let o = match quadrant {
            Quadrant::Q1 => self.q1,
            Quadrant::Q2 => self.q2,
            Quadrant::Q3 => self.q3,
            Quadrant::Q4 => self.q4,
        };
        Vec3::new(o.x, o.y, 0.0)
    }
}

/// Linear-actuator positions that put the arm in front of each work area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RailPositions {
    pub agv1: f64,
    pub agv2: f64,
    pub agv3: f64,
    pub agv4: f64,
    pub left_bins: f64,
    pub right_bins: f64,
}

impl Default for RailPositions {
    fn default() -> Self {
        Self {
            agv1: -4.5,
            agv2: -1.2,
            agv3: 1.2,
            agv4: 4.5,
            left_bins: 3.0,
            right_bins: -3.0,
        }
    }
}

impl RailPositions {
    pub fn agv(&self, agv: AgvId) -> f64 {
        match agv.number() {
            1 => self.agv1,
            2 => self.agv2,
            3 => self.agv3,
            _ => self.agv4,
        }
    }

    pub fn bins(&self, side: BinSide) -> f64 {
        match side {
            BinSide::LeftBins => self.left_bins,
            BinSide::RightBins => self.right_bins,
        }
    }
}

pub type JointPreset = BTreeMap<String, f64>;

fn station_preset(linear: f64, pan: f64) -> JointPreset {
    BTreeMap::from([
        ("linear_actuator_joint".to_string(), linear),
        ("floor_shoulder_pan_joint".to_string(), pan),
        ("floor_shoulder_lift_joint".to_string(), -1.57),
        ("floor_elbow_joint".to_string(), 1.57),
        ("floor_wrist_1_joint".to_string(), -1.57),
        ("floor_wrist_2_joint".to_string(), -1.57),
        ("floor_wrist_3_joint".to_string(), 0.0),
    ])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    /// Named planner target of the rest pose.
    pub home_target: String,
    /// World points the arm passes through to drop a removed part.
    pub disposal_waypoints: Vec<[f64; 3]>,
    pub quadrant_offsets: QuadrantOffsets,
    pub rail_positions: RailPositions,
    pub kts1_preset: JointPreset,
    pub kts2_preset: JointPreset,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            quadrant_offsets: QuadrantOffsets::default(),
            rail_positions: RailPositions::default(),
            home_target: "home".to_string(),
            kts1_preset: station_preset(4.0, 1.57),
            kts2_preset: station_preset(-4.0, -1.57),
            disposal_waypoints: vec![[-2.2, 0.0, 0.8], [-2.2, 0.0, 0.5]],
        }
    }
}

impl Layout {
    pub fn station_preset(&self, station: ToolStation) -> &JointPreset {
        match station {
            ToolStation::Kts1 => &self.kts1_preset,
            ToolStation::Kts2 => &self.kts2_preset,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Motion and attach
// ─────────────────────────────────────────────────────────────────────────────

/// Velocity/acceleration scaling for each kind of segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentLimits {
    pub pick: MotionLimits,
    pub pick_retreat: MotionLimits,
    pub probe: MotionLimits,
    pub place: MotionLimits,
    pub place_retreat: MotionLimits,
    pub tool_change: MotionLimits,
    pub tray_pick: MotionLimits,
    pub tray_place: MotionLimits,
    pub disposal: MotionLimits,
}

impl Default for SegmentLimits {
    fn default() -> Self {
        Self {
            pick: MotionLimits::new(0.3, 0.3),
            pick_retreat: MotionLimits::new(0.3, 0.3),
            probe: MotionLimits::new(0.1, 0.1),
            place: MotionLimits::new(0.3, 0.3),
            place_retreat: MotionLimits::new(0.2, 0.1),
            tool_change: MotionLimits::new(0.2, 0.1),
            tray_pick: MotionLimits::new(0.2, 0.2),
            tray_place: MotionLimits::new(0.2, 0.1),
            disposal: MotionLimits::new(0.3, 0.3),
        }
    }
}

impl SegmentLimits {
    fn all(&self) -> [(&'static str, MotionLimits); 9] {
        [
            ("pick", self.pick),
            ("pick_retreat", self.pick_retreat),
            ("probe", self.probe),
            ("place", self.place),
            ("place_retreat", self.place_retreat),
            ("tool_change", self.tool_change),
            ("tray_pick", self.tray_pick),
            ("tray_place", self.tray_place),
            ("disposal", self.disposal),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Interpolation step for Cartesian paths, in metres.
    pub eef_step: f64,
    /// Paths covering less than this share of their waypoints are rejected.
    pub min_coverage: f64,
    pub limits: SegmentLimits,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            eef_step: 0.01,
            min_coverage: 0.9,
            limits: SegmentLimits::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachConfig {
    pub bin_pick_timeout_secs: f64,
    pub pickup_timeout_secs: f64,
    pub tray_timeout_secs: f64,
    pub removal_timeout_secs: f64,
    pub probe_step: f64,
    pub removal_probe_step: f64,
    /// Pause after each probe before re-reading the gripper state.
    pub settle_secs: f64,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            bin_pick_timeout_secs: 3.0,
            pickup_timeout_secs: 5.0,
            tray_timeout_secs: 5.0,
            removal_timeout_secs: 10.0,
            probe_step: 0.001,
            removal_probe_step: 0.002,
            settle_secs: 0.0002,
        }
    }
}

impl AttachConfig {
    pub fn settle(&self) -> Duration {
        secs(self.settle_secs)
    }
}

/// Seconds as a [`Duration`]. Negative, NaN or out-of-range values give zero;
/// [`CellConfig::validate`] rejects them before they get here.
pub fn secs(v: f64) -> Duration {
    Duration::try_from_secs_f64(v).unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KittingConfig {
    /// Place the order's tray on the AGV before its parts.
    pub stage_tray: bool,
    /// Give up waiting for an AGV after this long. `None` waits indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agv_arrival_timeout_secs: Option<f64>,
}

impl KittingConfig {
    pub fn agv_arrival_timeout(&self) -> Option<Duration> {
        self.agv_arrival_timeout_secs
            .filter(|s| *s > 0.0 && s.is_finite())
            .map(secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CellConfig
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellConfig {
    pub geometry: Geometry,
    pub clearances: Clearances,
    pub layout: Layout,
    pub motion: MotionConfig,
    pub attach: AttachConfig,
    pub kitting: KittingConfig,
}

impl CellConfig {
    /// Reject values the sequencer cannot work with.
    pub fn validate(&self) -> Result<(), CellError> {
        let bad = |msg: String| Err(CellError::Config(msg));

        if !(self.motion.min_coverage > 0.0 && self.motion.min_coverage <= 1.0) {
            return bad(format!(
                "motion.min_coverage must be in (0, 1], got {}",
                self.motion.min_coverage
            ));
        }
        if !(self.motion.eef_step > 0.0 && self.motion.eef_step.is_finite()) {
            return bad(format!("motion.eef_step must be positive, got {}", self.motion.eef_step));
        }
        for (name, l) in self.motion.limits.all() {
            for (kind, v) in [("velocity_scale", l.velocity_scale), ("accel_scale", l.accel_scale)] {
                if !(v > 0.0 && v <= 1.0) {
                    return bad(format!("motion.limits.{name}.{kind} must be in (0, 1], got {v}"));
                }
            }
        }
        for (name, v) in [
            ("probe_step", self.attach.probe_step),
            ("removal_probe_step", self.attach.removal_probe_step),
            ("bin_pick_timeout_secs", self.attach.bin_pick_timeout_secs),
            ("pickup_timeout_secs", self.attach.pickup_timeout_secs),
            ("tray_timeout_secs", self.attach.tray_timeout_secs),
            ("removal_timeout_secs", self.attach.removal_timeout_secs),
        ] {
            if !(v > 0.0 && v.is_finite()) {
                return bad(format!("attach.{name} must be positive and finite, got {v}"));
            }
        }
        let settle = self.attach.settle_secs;
        if !(settle >= 0.0 && settle.is_finite()) {
            return bad(format!("attach.settle_secs must be finite and not negative, got {settle}"));
        }
        // Zero or negative disables the arrival timeout.
        if let Some(v) = self.kitting.agv_arrival_timeout_secs
            && !v.is_finite()
        {
            return bad(format!("kitting.agv_arrival_timeout_secs must be finite, got {v}"));
        }
        if self.layout.disposal_waypoints.is_empty() {
            return bad("layout.disposal_waypoints must not be empty".to_string());
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// `~/.kitcell/config.toml`
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".kitcell").join("config.toml")
}

/// Load, apply `KITCELL_*` overrides and validate. `Ok(None)` if the file
/// does not exist.
pub fn load_from(path: &Path) -> Result<Option<CellConfig>, CellError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        CellError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let mut cfg: CellConfig =
        toml::from_str(&raw).map_err(|e| CellError::Config(format!("failed to parse: {e}")))?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// [`load_from`] at the default path, falling back to defaults.
pub fn load_or_default() -> Result<CellConfig, CellError> {
    Ok(load_from(&config_path())?.unwrap_or_default())
}

/// | Variable | Field |
/// |---|---|
/// | `KITCELL_MIN_COVERAGE` | `motion.min_coverage` |
/// | `KITCELL_PROBE_STEP` | `attach.probe_step` |
/// | `KITCELL_BIN_PICK_TIMEOUT` | `attach.bin_pick_timeout_secs` |
/// | `KITCELL_STAGE_TRAY` | `kitting.stage_tray` |
pub fn apply_env_overrides(cfg: &mut CellConfig) {
    let float = |name: &str| std::env::var(name).ok().and_then(|v| v.parse::<f64>().ok());

    if let Some(v) = float("KITCELL_MIN_COVERAGE") {
        cfg.motion.min_coverage = v;
    }
    if let Some(v) = float("KITCELL_PROBE_STEP") {
        cfg.attach.probe_step = v;
    }
    if let Some(v) = float("KITCELL_BIN_PICK_TIMEOUT") {
        cfg.attach.bin_pick_timeout_secs = v;
    }
    if let Ok(v) = std::env::var("KITCELL_STAGE_TRAY")
        && let Ok(flag) = v.parse::<bool>()
    {
        cfg.kitting.stage_tray = flag;
    }
}

pub fn save_to(cfg: &CellConfig, path: &Path) -> Result<(), CellError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| CellError::Config(format!("failed to create config directory: {e}")))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| CellError::Config(format!("failed to serialize: {e}")))?;
    fs::write(path, raw)
        .map_err(|e| CellError::Config(format!("failed to write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        CellConfig::default().validate().unwrap();
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).unwrap().is_none());
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = CellConfig::default();
        cfg.geometry.part_heights.pump = 0.13;
        cfg.kitting.agv_arrival_timeout_secs = Some(30.0);
        save_to(&cfg, &path).unwrap();

        let loaded = load_from(&path).unwrap().unwrap();
        assert!((loaded.geometry.part_heights.of(PartType::Pump) - 0.13).abs() < 1e-12);
        assert_eq!(loaded.kitting.agv_arrival_timeout_secs, Some(30.0));
        assert_eq!(loaded.layout, cfg.layout);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[attach]\nremoval_timeout_secs = 12.5\n").unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert!((cfg.attach.removal_timeout_secs - 12.5).abs() < 1e-12);
        assert!((cfg.attach.bin_pick_timeout_secs - 3.0).abs() < 1e-12);
        assert!((cfg.motion.min_coverage - 0.9).abs() < 1e-12);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = CellConfig::default();
        cfg.motion.min_coverage = 1.5;
        assert!(matches!(cfg.validate(), Err(CellError::Config(_))));

        let mut cfg = CellConfig::default();
        cfg.attach.probe_step = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = CellConfig::default();
        cfg.motion.limits.place.velocity_scale = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_finite_durations_are_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        for body in [
            "[attach]\nbin_pick_timeout_secs = inf\n",
            "[attach]\nsettle_secs = inf\n",
            "[attach]\npickup_timeout_secs = nan\n",
            "[kitting]\nagv_arrival_timeout_secs = inf\n",
        ] {
            std::fs::write(&path, body).unwrap();
            assert!(
                matches!(load_from(&path), Err(CellError::Config(_))),
                "accepted {body:?}"
            );
        }
    }

    #[test]
    fn duration_conversions_never_panic() {
        assert_eq!(secs(f64::INFINITY), Duration::ZERO);
        assert_eq!(secs(f64::NAN), Duration::ZERO);
        assert_eq!(secs(-1.0), Duration::ZERO);
        assert_eq!(secs(1.5), Duration::from_millis(1500));

        let mut cfg = CellConfig::default();
        cfg.kitting.agv_arrival_timeout_secs = Some(f64::INFINITY);
        assert_eq!(cfg.kitting.agv_arrival_timeout(), None);
        cfg.kitting.agv_arrival_timeout_secs = Some(0.0);
        assert_eq!(cfg.kitting.agv_arrival_timeout(), None);
        cfg.kitting.agv_arrival_timeout_secs = Some(2.0);
        assert_eq!(cfg.kitting.agv_arrival_timeout(), Some(Duration::from_secs(2)));

        cfg.attach.settle_secs = f64::INFINITY;
        assert_eq!(cfg.attach.settle(), Duration::ZERO);
    }

    #[test]
    fn env_overrides_apply() {
        // SAFETY: the variable is unique to this test.
        unsafe { std::env::set_var("KITCELL_STAGE_TRAY", "true") };
        let mut cfg = CellConfig::default();
        apply_env_overrides(&mut cfg);
        unsafe { std::env::remove_var("KITCELL_STAGE_TRAY") };
        assert!(cfg.kitting.stage_tray);
    }

    #[test]
    fn lookups_follow_tables() {
        let cfg = CellConfig::default();
        let q3 = cfg.layout.quadrant_offsets.of(Quadrant::Q3);
        assert!((q3.x + 0.08).abs() < 1e-12 && (q3.y + 0.12).abs() < 1e-12);
        assert_eq!(cfg.layout.rail_positions.agv(AgvId::new(2).unwrap()), -1.2);
        assert_eq!(cfg.layout.rail_positions.bins(BinSide::LeftBins), 3.0);
        assert_eq!(
            cfg.layout.station_preset(ToolStation::Kts2)["linear_actuator_joint"],
            -4.0
        );
    }
}
