//! Pick-Place Task Sequencer.
//!
//! One part-placement cycle walks these phases:
//!
//! ```text
//! Idle → LocatingPart → ChangingTool? → Approaching → Descending
//!      → AwaitingAttach → Retreating → Transporting → Releasing → Done | Failed
//! ```
//!
//! Every action issues its outbound calls one at a time and awaits each
//! result.  Failures abort the action and surface as a [`CellError`]; the
//! only retry is the attach confirmation in [`crate::attach`].
//!
//! [`HeldObject`] is set only after the gripper feed confirms an attachment
//! and cleared only after the gripper has been released, so an aborted action
//! never leaves it claiming something that was not grasped.

use std::sync::Arc;
use std::time::Duration;

use kitcell_hal::CellBackends;
use kitcell_middleware::{EventBus, StateStore};
use kitcell_perception::pose::Pose;
use kitcell_types::{
    AgvId, CellError, EventPayload, Part, Quadrant, SequencerPhase, ToolFamily, ToolStation,
};
use tracing::{debug, info, instrument, warn};

use crate::attach::{await_attach, AttachProbe};
use crate::config::{self, CellConfig};
use crate::motion::ArmMotion;
use crate::waypoints::WaypointBuilder;

const SOURCE: &str = "kitcell-runtime::sequencer";
const TRAY_MESH: &str = "kit_tray.stl";

/// What the sequencer believes the gripper is holding.
#[derive(Debug, Clone, PartialEq)]
pub enum HeldObject {
    Part(Part),
    Tray { tray_id: u8, scene_name: String },
}

impl HeldObject {
    fn scene_name(&self) -> String {
        match self {
            HeldObject::Part(part) => part.scene_name(),
            HeldObject::Tray { scene_name, .. } => scene_name.clone(),
        }
    }
}

pub struct PickPlaceSequencer {
    cfg: Arc<CellConfig>,
    store: StateStore,
    backends: CellBackends,
    arm: ArmMotion,
    bus: EventBus,
    phase: SequencerPhase,
    held: Option<HeldObject>,
    trays_handled: u32,
}

impl PickPlaceSequencer {
    pub fn new(
        cfg: Arc<CellConfig>,
        store: StateStore,
        backends: CellBackends,
        bus: EventBus,
    ) -> Self {
        let arm = ArmMotion::new(backends.motion.clone(), &cfg.motion);
        Self {
            cfg,
            store,
            backends,
            arm,
            bus,
            phase: SequencerPhase::Idle,
            held: None,
            trays_handled: 0,
        }
    }

    pub fn phase(&self) -> SequencerPhase {
        self.phase
    }

    pub fn held(&self) -> Option<&HeldObject> {
        self.held.as_ref()
    }

    pub fn holds_part(&self) -> bool {
        matches!(self.held, Some(HeldObject::Part(_)))
    }

    fn set_phase(&mut self, phase: SequencerPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "sequencer phase");
            self.phase = phase;
            self.bus.emit(SOURCE, EventPayload::SequencerPhase(phase));
        }
    }

    /// Record the terminal phase of an action and pass its result through.
    fn finish(&mut self, action: &str, result: Result<(), CellError>) -> Result<(), CellError> {
        match &result {
            Ok(()) => self.set_phase(SequencerPhase::Done),
            Err(e) => {
                warn!(action, phase = ?self.phase, error = %e, "action failed");
                self.bus.emit(
                    SOURCE,
                    EventPayload::Fault {
                        component: action.to_string(),
                        message: e.to_string(),
                    },
                );
                self.set_phase(SequencerPhase::Failed);
            }
        }
        result
    }

    fn probe(&self, timeout_secs: f64, probe_step: f64) -> AttachProbe {
        AttachProbe {
            timeout: config::secs(timeout_secs),
            probe_step,
            limits: self.cfg.motion.limits.probe,
            settle: self.cfg.attach.settle(),
        }
    }

    // ── Simple moves ────────────────────────────────────────────────────────

    /// Move to the rest pose.
    pub async fn go_home(&mut self) -> Result<(), CellError> {
        let target = self.cfg.layout.home_target.clone();
        self.arm.move_to_named(&target).await
    }

    /// Move to the joint preset in front of a kit-tray station.
    pub async fn move_to_table(&mut self, station: ToolStation) -> Result<(), CellError> {
        let preset = self.cfg.layout.station_preset(station).clone();
        self.arm.move_to_joints(&preset).await
    }

    /// Enable or disable the gripper. Asking for the state it is already in
    /// succeeds without a call.
    pub async fn set_gripper_state(&mut self, enable: bool) -> Result<(), CellError> {
        if self.store.gripper().enabled == enable {
            debug!(enable, "gripper already in requested state");
            return Ok(());
        }
        self.backends.gripper.set_enabled(enable).await
    }

    // ── Tool changes ────────────────────────────────────────────────────────

    async fn tool_changer_slot(
        &self,
        station: ToolStation,
        family: ToolFamily,
    ) -> Result<Pose, CellError> {
        self.backends
            .frames
            .world_pose_of(&station.tool_changer_frame(family))
            .await
    }

    pub async fn enter_tool_changer(
        &mut self,
        station: ToolStation,
        family: ToolFamily,
    ) -> Result<(), CellError> {
        let slot = self.tool_changer_slot(station, family).await?;
        let cfg = self.cfg.clone();
        let wps = WaypointBuilder::new(&cfg).tool_changer_enter(&slot);
        self.arm.move_through(&wps, cfg.motion.limits.tool_change).await
    }

    pub async fn exit_tool_changer(
        &mut self,
        station: ToolStation,
        family: ToolFamily,
    ) -> Result<(), CellError> {
        let slot = self.tool_changer_slot(station, family).await?;
        let cfg = self.cfg.clone();
        let wps = WaypointBuilder::new(&cfg).tool_changer_exit(&slot);
        self.arm.move_through(&wps, cfg.motion.limits.tool_change).await
    }

    #[instrument(skip(self))]
    async fn change_tool(&mut self, station: ToolStation, family: ToolFamily) -> Result<(), CellError> {
        self.set_phase(SequencerPhase::ChangingTool);
        info!(%station, %family, "changing gripper");
        self.move_to_table(station).await?;
        self.enter_tool_changer(station, family).await?;
        self.backends.tool_changer.request_change(station, family).await?;
        self.exit_tool_changer(station, family).await
    }

    /// Change to `family` at `station` unless that gripper is already mounted.
    async fn ensure_tool(&mut self, family: ToolFamily, station: ToolStation) -> Result<(), CellError> {
        if self.store.gripper().gripper_type == family.gripper_type() {
            return Ok(());
        }
        self.change_tool(station, family).await
    }

    // ── Part pickup ─────────────────────────────────────────────────────────

    /// Locate `part` in the bins, change tools if needed and pick it up.
    #[instrument(skip(self))]
    pub async fn pickup_bin_part(&mut self, part: Part) -> Result<(), CellError> {
        let result = self.pickup_bin_part_inner(part).await;
        self.finish("pickup_bin_part", result)
    }

    async fn pickup_bin_part_inner(&mut self, part: Part) -> Result<(), CellError> {
        self.ensure_hands_free()?;
        self.set_phase(SequencerPhase::LocatingPart);
        let sighting = self
            .store
            .locate_part(part)
            .ok_or_else(|| CellError::PerceptionMiss(part.to_string()))?;
        info!(source = %sighting.source, "part located");

        let station = ToolStation::nearest_to(sighting.pose.position.y);
        self.ensure_tool(ToolFamily::Parts, station).await?;

        let rail = self.cfg.layout.rail_positions.bins(sighting.source);
        self.arm.move_rail(rail).await?;

        let timeout = self.cfg.attach.bin_pick_timeout_secs;
        self.grasp_part(part, sighting.pose, timeout, 0.0).await
    }

    /// Pick `part` at an explicit world pose.
    #[instrument(skip(self))]
    pub async fn pickup_part_at(
        &mut self,
        part: Part,
        pose: Pose,
        timeout: Duration,
    ) -> Result<(), CellError> {
        let result = async {
            self.ensure_hands_free()?;
            self.arm.move_rail(-pose.position.y).await?;
            self.grasp_part(part, pose, timeout.as_secs_f64(), pose.yaw()).await
        }
        .await;
        self.finish("pickup_part", result)
    }

    fn ensure_hands_free(&self) -> Result<(), CellError> {
        if self.held.is_some() || self.store.gripper().attached {
            Err(CellError::AlreadyAttached)
        } else {
            Ok(())
        }
    }

    /// Descend at the part's yaw, grasp, then retreat at `retreat_rotation`.
    async fn grasp_part(
        &mut self,
        part: Part,
        pose: Pose,
        timeout_secs: f64,
        retreat_rotation: f64,
    ) -> Result<(), CellError> {
        let cfg = self.cfg.clone();
        let limits = &cfg.motion.limits;
        let wp = WaypointBuilder::new(&cfg);
        let rotation = pose.yaw();
        let grasp = wp.pickup(&pose, part.part_type, rotation);

        self.set_phase(SequencerPhase::Approaching);
        self.arm.move_through(&grasp[..1], limits.pick).await?;

        self.set_phase(SequencerPhase::Descending);
        self.arm.move_through(&grasp[1..], limits.pick).await?;

        self.set_phase(SequencerPhase::AwaitingAttach);
        self.set_gripper_state(true).await?;
        await_attach(
            &self.store,
            &self.arm,
            self.probe(timeout_secs, cfg.attach.probe_step),
        )
        .await?;

        self.set_phase(SequencerPhase::Retreating);
        self.hold(HeldObject::Part(part), &part.mesh(), pose);
        self.arm
            .move_through(&wp.pickup_retreat(&pose, retreat_rotation), limits.pick_retreat)
            .await
    }

    fn hold(&mut self, object: HeldObject, mesh: &str, pose: Pose) {
        let name = object.scene_name();
        self.backends.scene.register_object(&name, mesh, pose);
        self.backends.scene.attach(&name);
        info!(object = %name, "object attached");
        self.held = Some(object);
    }

    /// Gripper is off; forget whatever was held.
    fn release(&mut self) {
        if let Some(object) = self.held.take() {
            self.backends.scene.detach(&object.scene_name());
        }
    }

    /// Switch the gripper off and forget whatever was held, leaving the
    /// sequencer empty-handed after a failed pick or place.
    pub async fn release_held(&mut self) -> Result<(), CellError> {
        self.set_gripper_state(false).await?;
        if let Some(object) = &self.held {
            warn!(object = %object.scene_name(), "dropping held object");
        }
        self.release();
        Ok(())
    }

    /// Require the gripper to be attached. A held object the gripper no
    /// longer reports is dropped from the model.
    fn confirm_attached(&mut self) -> Result<(), CellError> {
        if self.store.gripper().attached {
            return Ok(());
        }
        if self.held.is_some() {
            warn!("gripper reports no attachment; clearing held object");
            self.release();
        }
        Err(CellError::NothingAttached)
    }

    // ── Part placement ──────────────────────────────────────────────────────

    /// Drop the held part into `quadrant` of the tray on `agv`.
    #[instrument(skip(self))]
    pub async fn place_part_on_tray(&mut self, agv: AgvId, quadrant: Quadrant) -> Result<(), CellError> {
        let result = self.place_part_inner(agv, quadrant).await;
        self.finish("place_part_on_tray", result)
    }

    async fn place_part_inner(&mut self, agv: AgvId, quadrant: Quadrant) -> Result<(), CellError> {
        self.confirm_attached()?;
        let Some(HeldObject::Part(part)) = self.held.clone() else {
            return Err(CellError::NothingAttached);
        };
        let cfg = self.cfg.clone();
        let limits = &cfg.motion.limits;
        let wp = WaypointBuilder::new(&cfg);

        self.set_phase(SequencerPhase::Transporting);
        self.arm.move_rail(cfg.layout.rail_positions.agv(agv)).await?;
        let tray = self.backends.frames.world_pose_of(&agv.tray_frame()).await?;
        let target = wp.quadrant_target(&tray, quadrant);
        // Parts go down square to the world frame whatever the tray's yaw.
        let rotation = 0.0;
        self.arm
            .move_through(&wp.place(&target, part.part_type, rotation), limits.place)
            .await?;

        self.set_phase(SequencerPhase::Releasing);
        self.set_gripper_state(false).await?;
        self.release();
        info!(%part, "part placed");

        if let Err(e) = self
            .arm
            .move_through(&wp.place_retreat(&target, rotation), limits.place_retreat)
            .await
        {
            warn!(error = %e, "retreat after placement failed");
        }
        Ok(())
    }

    // ── Removal ─────────────────────────────────────────────────────────────

    /// Pick a faulty `part` off a tray at `pose` and drop it at the disposal
    /// point.
    #[instrument(skip(self))]
    pub async fn remove_part(&mut self, part: Part, pose: Pose) -> Result<(), CellError> {
        let result = self.remove_part_inner(part, pose).await;
        self.finish("remove_part", result)
    }

    async fn remove_part_inner(&mut self, part: Part, pose: Pose) -> Result<(), CellError> {
        self.ensure_hands_free()?;
        let cfg = self.cfg.clone();
        let limits = &cfg.motion.limits;
        let wp = WaypointBuilder::new(&cfg);
        // Parts on a tray sit square to the world frame.
        let rotation = 0.0;

        self.arm.move_rail(-pose.position.y).await?;
        let grasp = wp.removal_grasp(&pose, part.part_type, rotation);
        self.set_phase(SequencerPhase::Approaching);
        self.arm.move_through(&grasp[..1], limits.pick).await?;
        self.set_phase(SequencerPhase::Descending);
        self.arm.move_through(&grasp[1..], limits.pick).await?;

        self.set_phase(SequencerPhase::AwaitingAttach);
        self.set_gripper_state(true).await?;
        await_attach(
            &self.store,
            &self.arm,
            self.probe(cfg.attach.removal_timeout_secs, cfg.attach.removal_probe_step),
        )
        .await?;

        self.set_phase(SequencerPhase::Retreating);
        self.hold(HeldObject::Part(part), &part.mesh(), pose);
        self.arm
            .move_through(&wp.pickup_retreat(&pose, rotation), limits.pick_retreat)
            .await?;

        self.set_phase(SequencerPhase::Transporting);
        self.arm.move_through(&wp.disposal(), limits.disposal).await?;

        self.set_phase(SequencerPhase::Releasing);
        self.set_gripper_state(false).await?;
        self.release();
        info!(%part, "part disposed");
        Ok(())
    }

    // ── Trays ───────────────────────────────────────────────────────────────

    /// Pick tray `tray_id` off its kit-tray station table.
    #[instrument(skip(self))]
    pub async fn pickup_tray(&mut self, tray_id: u8) -> Result<(), CellError> {
        let result = self.pickup_tray_inner(tray_id).await;
        self.finish("pickup_tray", result)
    }

    async fn pickup_tray_inner(&mut self, tray_id: u8) -> Result<(), CellError> {
        self.ensure_hands_free()?;
        self.set_phase(SequencerPhase::LocatingPart);
        let sighting = self
            .store
            .locate_tray(tray_id)
            .ok_or_else(|| CellError::PerceptionMiss(format!("kit tray {tray_id}")))?;

        self.ensure_tool(ToolFamily::Trays, sighting.station).await?;
        self.move_to_table(sighting.station).await?;

        let cfg = self.cfg.clone();
        let limits = &cfg.motion.limits;
        let wp = WaypointBuilder::new(&cfg);
        let grasp = wp.tray_pickup(&sighting.pose);

        self.set_phase(SequencerPhase::Approaching);
        self.arm.move_through(&grasp[..1], limits.tray_pick).await?;
        self.set_phase(SequencerPhase::Descending);
        self.arm.move_through(&grasp[1..], limits.tray_pick).await?;

        self.set_phase(SequencerPhase::AwaitingAttach);
        self.set_gripper_state(true).await?;
        await_attach(
            &self.store,
            &self.arm,
            self.probe(cfg.attach.tray_timeout_secs, cfg.attach.probe_step),
        )
        .await?;

        self.set_phase(SequencerPhase::Retreating);
        self.trays_handled += 1;
        let scene_name = format!("kit_tray_{tray_id}_{}", self.trays_handled);
        self.hold(HeldObject::Tray { tray_id, scene_name }, TRAY_MESH, sighting.pose);
        self.arm
            .move_through(&wp.tray_retreat(&sighting.pose), limits.tray_pick)
            .await
    }

    /// Lower the held tray onto the mount of `agv`.
    #[instrument(skip(self))]
    pub async fn place_tray_on_agv(&mut self, agv: AgvId) -> Result<(), CellError> {
        let result = self.place_tray_inner(agv).await;
        self.finish("place_tray_on_agv", result)
    }

    async fn place_tray_inner(&mut self, agv: AgvId) -> Result<(), CellError> {
        self.confirm_attached()?;
        if !matches!(self.held, Some(HeldObject::Tray { .. })) {
            return Err(CellError::NothingAttached);
        }
        let cfg = self.cfg.clone();
        let limits = &cfg.motion.limits;
        let wp = WaypointBuilder::new(&cfg);

        self.set_phase(SequencerPhase::Transporting);
        self.arm.move_rail(cfg.layout.rail_positions.agv(agv)).await?;
        let mount = self.backends.frames.world_pose_of(&agv.tray_frame()).await?;
        self.arm.move_through(&wp.tray_place(&mount), limits.tray_place).await?;

        self.set_phase(SequencerPhase::Releasing);
        self.set_gripper_state(false).await?;
        self.release();
        info!(%agv, "tray placed");

        if let Err(e) = self
            .arm
            .move_through(&wp.tray_place_retreat(&mount), limits.tray_place)
            .await
        {
            warn!(error = %e, "retreat after tray placement failed");
        }
        Ok(())
    }

    pub async fn move_tray_to_agv(&mut self, tray_id: u8, agv: AgvId) -> Result<(), CellError> {
        self.pickup_tray(tray_id).await?;
        self.place_tray_on_agv(agv).await
    }
}
