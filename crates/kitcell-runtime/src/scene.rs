//! Fixed cell furniture registered with the collision scene at start-up.

use std::f64::consts::PI;

use kitcell_hal::SceneRegistry;
use kitcell_perception::pose::Pose;
use tracing::info;

/// One piece of static furniture.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneModel {
    pub name: String,
    pub mesh: &'static str,
    pub pose: Pose,
}

fn model(name: &str, mesh: &'static str, pose: Pose) -> SceneModel {
    SceneModel {
        name: name.to_string(),
        mesh,
        pose,
    }
}

/// Bins, assembly stations and their inserts, the conveyor and both
/// kit-tray tables.
pub fn static_models() -> Vec<SceneModel> {
    let mut models = Vec::with_capacity(19);

    let bins = [
        ("bin1", -1.9, 3.375),
        ("bin2", -1.9, 2.625),
        ("bin3", -2.65, 2.625),
        ("bin4", -2.65, 3.375),
        ("bin5", -1.9, -3.375),
        ("bin6", -1.9, -2.625),
        ("bin7", -2.65, -2.625),
        ("bin8", -2.65, -3.375),
    ];
    for (name, x, y) in bins {
        models.push(model(name, "bin.stl", Pose::from_xyz_yaw(x, y, 0.0, PI)));
    }

    for (n, x, y) in [(1, -7.3, 3.0), (2, -12.3, 3.0), (3, -7.3, -3.0), (4, -12.3, -3.0)] {
        models.push(model(
            &format!("as{n}"),
            "assembly_station.stl",
            Pose::from_xyz_yaw(x, y, 0.0, 0.0),
        ));
        models.push(model(
            &format!("as{n}_insert"),
            "assembly_insert.stl",
            Pose::from_xyz_yaw(x - 0.4, y, 1.011, 0.0),
        ));
    }

    models.push(model("conveyor", "conveyor.stl", Pose::from_xyz_yaw(-0.6, 0.0, 0.0, 0.0)));
    models.push(model(
        "kts1_table",
        "kit_tray_table.stl",
        Pose::from_xyz_yaw(-1.3, -5.84, 0.0, PI),
    ));
    models.push(model(
        "kts2_table",
        "kit_tray_table.stl",
        Pose::from_xyz_yaw(-1.3, 5.84, 0.0, 0.0),
    ));
    models
}

pub fn populate_static_scene(scene: &dyn SceneRegistry) -> usize {
    let models = static_models();
    for m in &models {
        scene.register_object(&m.name, m.mesh, m.pose);
    }
    info!(objects = models.len(), "static scene populated");
    models.len()
}
