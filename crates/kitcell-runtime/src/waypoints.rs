//! Waypoint Builder.
//!
//! Turns a target pose plus part/tray geometry into the ordered Cartesian
//! poses of each motion segment.  All heights come from [`CellConfig`]; the
//! builder itself holds no constants.
//!
//! | Segment | Poses |
//! |---|---|
//! | pickup | above target (`pick_approach`), grasp height (`part_height + pick_offset`) |
//! | pickup retreat | `pick_retreat` above target |
//! | place | above destination (`place_approach`), drop height (`part_height + drop_height + release_margin`) |
//! | tray pickup | `tray_approach` above tray, `pick_offset` above tray |
//! | tray place | `tray_place_approach`, `kit_tray_thickness + drop_height` |
//! | tool changer | `tool_changer_approach` above slot, slot |
//!
//! Part and tool-changer segments use the top-down tool orientation rotated
//! by the caller's yaw.

use kitcell_perception::pose::{tool_orientation, Pose, Vec3};
use kitcell_types::{PartType, Quadrant};

use crate::config::CellConfig;

#[derive(Debug, Clone, Copy)]
pub struct WaypointBuilder<'a> {
    cfg: &'a CellConfig,
}

impl<'a> WaypointBuilder<'a> {
    pub fn new(cfg: &'a CellConfig) -> Self {
        Self { cfg }
    }

    fn above(target: &Pose, dz: f64, rotation: f64) -> Pose {
        Pose::new(
            Vec3::new(target.position.x, target.position.y, target.position.z + dz),
            tool_orientation(rotation),
        )
    }

    fn part_height(&self, part_type: PartType) -> f64 {
        self.cfg.geometry.part_heights.of(part_type)
    }

    pub fn pickup(&self, target: &Pose, part_type: PartType, rotation: f64) -> Vec<Pose> {
        let g = &self.cfg.geometry;
        vec![
            Self::above(target, self.cfg.clearances.pick_approach, rotation),
            Self::above(target, self.part_height(part_type) + g.pick_offset, rotation),
        ]
    }

    pub fn pickup_retreat(&self, target: &Pose, rotation: f64) -> Vec<Pose> {
        vec![Self::above(target, self.cfg.clearances.pick_retreat, rotation)]
    }

    pub fn place(&self, destination: &Pose, part_type: PartType, rotation: f64) -> Vec<Pose> {
        let g = &self.cfg.geometry;
        vec![
            Self::above(destination, self.cfg.clearances.place_approach, rotation),
            Self::above(
                destination,
                self.part_height(part_type) + g.drop_height + g.release_margin,
                rotation,
            ),
        ]
    }

    pub fn place_retreat(&self, destination: &Pose, rotation: f64) -> Vec<Pose> {
        vec![Self::above(destination, self.cfg.clearances.place_approach, rotation)]
    }

    /// Grasp a part already sitting on a tray, slightly above the normal
    /// grasp height.
    pub fn removal_grasp(&self, target: &Pose, part_type: PartType, rotation: f64) -> Vec<Pose> {
        let g = &self.cfg.geometry;
        vec![
            Self::above(target, self.cfg.clearances.pick_approach, rotation),
            Self::above(
                target,
                self.part_height(part_type) + g.pick_offset + g.release_margin,
                rotation,
            ),
        ]
    }

    /// Fixed drop-off route for removed parts.
    pub fn disposal(&self) -> Vec<Pose> {
        self.cfg
            .layout
            .disposal_waypoints
            .iter()
            .map(|[x, y, z]| Pose::new(Vec3::new(*x, *y, *z), tool_orientation(0.0)))
            .collect()
    }

    pub fn tray_pickup(&self, tray: &Pose) -> Vec<Pose> {
        let yaw = tray.yaw();
        vec![
            Self::above(tray, self.cfg.clearances.tray_approach, yaw),
            Self::above(tray, self.cfg.geometry.pick_offset, yaw),
        ]
    }

    pub fn tray_retreat(&self, tray: &Pose) -> Vec<Pose> {
        vec![Self::above(tray, self.cfg.clearances.tray_approach, tray.yaw())]
    }

    pub fn tray_place(&self, mount: &Pose) -> Vec<Pose> {
        let g = &self.cfg.geometry;
        let yaw = mount.yaw();
        vec![
            Self::above(mount, self.cfg.clearances.tray_place_approach, yaw),
            Self::above(mount, g.kit_tray_thickness + g.drop_height, yaw),
        ]
    }

    pub fn tray_place_retreat(&self, mount: &Pose) -> Vec<Pose> {
        vec![Self::above(mount, self.cfg.clearances.tray_place_approach, mount.yaw())]
    }

    pub fn tool_changer_enter(&self, slot: &Pose) -> Vec<Pose> {
        let yaw = slot.yaw();
        vec![
            Self::above(slot, self.cfg.clearances.tool_changer_approach, yaw),
            Self::above(slot, 0.0, yaw),
        ]
    }

    pub fn tool_changer_exit(&self, slot: &Pose) -> Vec<Pose> {
        vec![Self::above(slot, self.cfg.clearances.tool_changer_approach, slot.yaw())]
    }

    /// Drop target for `quadrant`: the quadrant offset applied in the tray's
    /// own frame.
    pub fn quadrant_target(&self, tray: &Pose, quadrant: Quadrant) -> Pose {
        let offset = Pose::new(
            self.cfg.layout.quadrant_offsets.of(quadrant),
            Default::default(),
        );
        tray.compose(&offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitcell_perception::pose::Quaternion;
    use std::f64::consts::FRAC_PI_2;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn pickup_uses_part_height_and_pick_offset() {
        let cfg = CellConfig::default();
        let wp = WaypointBuilder::new(&cfg);
        let target = Pose::from_xyz_yaw(-1.9, 3.375, 0.72, 0.0);

        let poses = wp.pickup(&target, PartType::Gear, 0.0);
        assert_eq!(poses.len(), 2);
        assert!(close(poses[0].position.z, 0.72 + 0.5));
        assert!(close(poses[1].position.z, 0.72 + 0.02 + 0.003));
        assert!(close(poses[1].position.x, -1.9));
        assert!(poses[0].position.z > poses[1].position.z);
    }

    #[test]
    fn pickup_orientation_points_down() {
        let cfg = CellConfig::default();
        let wp = WaypointBuilder::new(&cfg);
        let poses = wp.pickup(&Pose::identity(), PartType::Pump, 0.7);
        let down = poses[1].orientation.rotate(Vec3::new(0.0, 0.0, 1.0));
        assert!(close(down.z, -1.0));
    }

    #[test]
    fn place_adds_drop_clearance() {
        let cfg = CellConfig::default();
        let wp = WaypointBuilder::new(&cfg);
        let dest = Pose::from_xyz_yaw(0.0, 0.0, 0.75, 0.0);
        let poses = wp.place(&dest, PartType::Battery, 0.0);
        assert!(close(poses[0].position.z, 0.75 + 0.3));
        assert!(close(poses[1].position.z, 0.75 + 0.04 + 0.002 + 0.01));
    }

    #[test]
    fn heights_follow_configuration() {
        let mut cfg = CellConfig::default();
        cfg.geometry.part_heights.gear = 0.05;
        cfg.clearances.pick_approach = 0.25;
        let wp = WaypointBuilder::new(&cfg);
        let poses = wp.pickup(&Pose::identity(), PartType::Gear, 0.0);
        assert!(close(poses[0].position.z, 0.25));
        assert!(close(poses[1].position.z, 0.053));
    }

    #[test]
    fn quadrant_offset_rotates_with_tray() {
        let cfg = CellConfig::default();
        let wp = WaypointBuilder::new(&cfg);
        let tray = Pose::new(Vec3::new(1.0, 1.0, 0.75), Quaternion::from_yaw(FRAC_PI_2));
        // Q1 offset (-0.08, 0.12) rotated by 90° becomes (-0.12, -0.08).
        let target = wp.quadrant_target(&tray, Quadrant::Q1);
        assert!(close(target.position.x, 1.0 - 0.12));
        assert!(close(target.position.y, 1.0 - 0.08));
        assert!(close(target.position.z, 0.75));
    }

    #[test]
    fn tool_changer_enters_at_slot_height() {
        let cfg = CellConfig::default();
        let wp = WaypointBuilder::new(&cfg);
        let slot = Pose::from_xyz_yaw(-1.3, -5.5, 1.011, 0.0);
        let enter = wp.tool_changer_enter(&slot);
        assert!(close(enter[0].position.z, 1.411));
        assert!(close(enter[1].position.z, 1.011));
        assert!(close(wp.tool_changer_exit(&slot)[0].position.z, 1.411));
    }

    #[test]
    fn tray_segments_use_tray_geometry() {
        let cfg = CellConfig::default();
        let wp = WaypointBuilder::new(&cfg);
        let tray = Pose::from_xyz_yaw(-0.87, -5.84, 0.73, 0.4);
        let pick = wp.tray_pickup(&tray);
        assert!(close(pick[1].position.z, 0.733));
        let mount = Pose::from_xyz_yaw(-2.265, 1.2, 0.75, 0.0);
        let place = wp.tray_place(&mount);
        assert!(close(place[1].position.z, 0.75 + 0.01 + 0.002));
    }

    #[test]
    fn disposal_route_comes_from_layout() {
        let cfg = CellConfig::default();
        let poses = WaypointBuilder::new(&cfg).disposal();
        assert_eq!(poses.len(), 2);
        assert!(close(poses[0].position.x, -2.2));
        assert!(close(poses[1].position.z, 0.5));
    }
}
