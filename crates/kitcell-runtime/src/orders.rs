//! Order Queue & Task State Machine.
//!
//! ```text
//! AwaitingFirstOrder → ProcessingOrder → AwaitingDestinationArrival → Submitting
//!        ↑                                                                │
//!        └────────────────────────────────────────────────────────────────┘
//!                     (queue empty + announcements done) → Completed
//!                     (competition ended, anywhere)      → Aborted
//! ```
//!
//! | Situation | Result |
//! |---|---|
//! | A part cannot be picked or placed | logged, next part is attempted |
//! | Quality check reports an issue | logged, order continues |
//! | Destination move or arrival fails | order abandoned without submission |
//! | AGV sent off | submission waits for the order's own destination, not always the warehouse |
//! | Order id already submitted | dropped, never submitted twice |
//! | Competition `Ended` | queue discarded, overall failure |
//!
//! Waits never spin: the loop parks on the [`StateStore`] watch feeds and
//! always races them against [`StateStore::session_ended`].

use std::collections::HashSet;
use std::sync::Arc;

use kitcell_hal::CellBackends;
use kitcell_middleware::{EventBus, StateStore};
use kitcell_types::{
    CellError, CompetitionState, EventPayload, KittingTask, Order, OrderPhase, OrderTask,
};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::agv::AgvTracker;
use crate::config::CellConfig;
use crate::sequencer::PickPlaceSequencer;

const SOURCE: &str = "kitcell-runtime::orders";

/// The sequencer shared by the order loop and the command server.
pub type SharedSequencer = Arc<Mutex<PickPlaceSequencer>>;

/// What happened to one dequeued order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderReport {
    pub order_id: String,
    pub parts_attempted: usize,
    pub parts_placed: usize,
    /// `None` when the check itself could not be run.
    pub quality_passed: Option<bool>,
    pub submitted: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionOutcome {
    pub success: bool,
    pub reports: Vec<OrderReport>,
    /// Ids dropped from the queue when the session ended.
    pub discarded: Vec<String>,
}

pub struct OrderProcessor {
    cfg: Arc<CellConfig>,
    store: StateStore,
    backends: CellBackends,
    bus: EventBus,
    sequencer: SharedSequencer,
    agvs: AgvTracker,
    phase: OrderPhase,
    submitted: HashSet<String>,
    reports: Vec<OrderReport>,
}

impl OrderProcessor {
    pub fn new(
        cfg: Arc<CellConfig>,
        store: StateStore,
        backends: CellBackends,
        bus: EventBus,
        sequencer: SharedSequencer,
    ) -> Self {
        Self {
            agvs: AgvTracker::new(store.clone()),
            cfg,
            store,
            backends,
            bus,
            sequencer,
            phase: OrderPhase::AwaitingFirstOrder,
            submitted: HashSet::new(),
            reports: Vec::new(),
        }
    }

    pub fn phase(&self) -> OrderPhase {
        self.phase
    }

    fn set_phase(&mut self, order_id: Option<&str>, phase: OrderPhase) {
        self.phase = phase;
        self.bus.emit(
            SOURCE,
            EventPayload::OrderPhase {
                order_id: order_id.map(str::to_string),
                phase,
            },
        );
    }

    /// Drive the queue until the session completes or ends.
    pub async fn run(&mut self) -> SessionOutcome {
        self.set_phase(None, OrderPhase::AwaitingFirstOrder);
        loop {
            if self.store.competition() == CompetitionState::Ended {
                return self.abort();
            }

            let Some(order) = self.store.pop_order() else {
                if self.store.competition() == CompetitionState::OrderAnnouncementsDone {
                    return self.complete();
                }
                if self.phase != OrderPhase::AwaitingFirstOrder {
                    self.set_phase(None, OrderPhase::AwaitingFirstOrder);
                }
                let store = self.store.clone();
                tokio::select! {
                    _ = store.session_ended() => {}
                    arrived = store.wait_for_order() => {
                        if let Err(e) = arrived {
                            error!(error = %e, "order feed closed");
                            return self.abort();
                        }
                    }
                    _ = store.wait_for_competition(|s| s == CompetitionState::OrderAnnouncementsDone) => {}
                }
                continue;
            };

            match self.process(order).await {
                Err(CellError::SessionEnded) => return self.abort(),
                Err(e) => warn!(error = %e, "order processing stopped"),
                Ok(()) => {}
            }
        }
    }

    async fn process(&mut self, order: Order) -> Result<(), CellError> {
        if self.submitted.contains(&order.id) {
            warn!(order_id = %order.id, "order already submitted, dropping duplicate");
            self.discard(&order.id, "already submitted");
            return Ok(());
        }

        self.set_phase(Some(&order.id), OrderPhase::ProcessingOrder);
        match &order.task {
            OrderTask::Kitting(task) => {
                info!(order_id = %order.id, agv = %task.agv, parts = task.parts.len(), "processing kitting order");
                let mut report = OrderReport {
                    order_id: order.id.clone(),
                    ..OrderReport::default()
                };
                let result = self.process_kitting(&order.id, task, &mut report).await;
                self.reports.push(report);
                result
            }
            OrderTask::Assembly | OrderTask::Combined => {
                warn!(order_id = %order.id, "only kitting orders are handled");
                self.discard(&order.id, "unsupported task type");
                Ok(())
            }
        }
    }

    #[instrument(skip(self, task, report))]
    async fn process_kitting(
        &mut self,
        order_id: &str,
        task: &KittingTask,
        report: &mut OrderReport,
    ) -> Result<(), CellError> {
        {
            let mut seq = self.sequencer.lock().await;
            if let Err(e) = seq.go_home().await {
                warn!(error = %e, "unable to reach home pose");
            }
            if self.cfg.kitting.stage_tray
                && let Some(tray_id) = task.tray_id
            {
                match seq.move_tray_to_agv(tray_id, task.agv).await {
                    Ok(()) => self.agvs.mark_tray_staged(task.agv, tray_id),
                    Err(e) => warn!(tray_id, error = %e, "tray staging failed"),
                }
            }
        }

        for kp in &task.parts {
            if self.store.competition() == CompetitionState::Ended {
                return Err(CellError::SessionEnded);
            }
            report.parts_attempted += 1;

            let mut seq = self.sequencer.lock().await;
            let placed = match seq.pickup_bin_part(kp.part).await {
                Ok(()) => match seq.place_part_on_tray(task.agv, kp.quadrant).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(part = %kp.part, quadrant = %kp.quadrant, error = %e, "placement failed");
                        false
                    }
                },
                Err(e) => {
                    warn!(part = %kp.part, error = %e, "pickup failed");
                    false
                }
            };
            // Whatever this cycle left in the gripper must not reach the next
            // part's quadrant. An attach timeout also leaves the gripper on.
            if !placed
                && let Err(e) = seq.release_held().await
            {
                warn!(error = %e, "unable to release gripper");
            }
            drop(seq);

            if placed {
                report.parts_placed += 1;
            }
            self.bus.emit(
                SOURCE,
                EventPayload::PartPlaced {
                    order_id: order_id.to_string(),
                    part: kp.part,
                    quadrant: kp.quadrant,
                    success: placed,
                },
            );
        }

        match self.backends.fulfillment.perform_quality_check(order_id).await {
            Ok(all_passed) => {
                if all_passed {
                    info!("quality check passed");
                } else {
                    warn!("Issue with shipment");
                }
                report.quality_passed = Some(all_passed);
                self.bus.emit(
                    SOURCE,
                    EventPayload::QualityChecked {
                        order_id: order_id.to_string(),
                        all_passed,
                    },
                );
            }
            Err(e) => warn!(error = %e, "quality check unavailable"),
        }

        if let Err(e) = self
            .backends
            .fulfillment
            .move_destination(task.agv, task.destination)
            .await
        {
            error!(agv = %task.agv, error = %e, "destination move failed, order abandoned");
            return Ok(());
        }

        self.set_phase(Some(order_id), OrderPhase::AwaitingDestinationArrival);
        match self
            .agvs
            .wait_until_at(task.agv, task.destination, self.cfg.kitting.agv_arrival_timeout())
            .await
        {
            Ok(()) => {}
            Err(CellError::SessionEnded) => return Err(CellError::SessionEnded),
            Err(e) => {
                error!(agv = %task.agv, error = %e, "agv did not arrive, order abandoned");
                return Ok(());
            }
        }
        self.agvs.mark_departed(task.agv);

        self.set_phase(Some(order_id), OrderPhase::Submitting);
        self.submitted.insert(order_id.to_string());
        let accepted = match self.backends.fulfillment.submit(order_id).await {
            Ok(()) => {
                info!("order submitted");
                true
            }
            Err(e) => {
                error!(error = %e, "submission failed");
                false
            }
        };
        report.submitted = accepted;
        self.bus.emit(
            SOURCE,
            EventPayload::OrderSubmitted {
                order_id: order_id.to_string(),
                accepted,
            },
        );
        Ok(())
    }

    fn discard(&self, order_id: &str, reason: &str) {
        self.bus.emit(
            SOURCE,
            EventPayload::OrderDiscarded {
                order_id: order_id.to_string(),
                reason: reason.to_string(),
            },
        );
    }

    fn abort(&mut self) -> SessionOutcome {
        let dropped = self.store.discard_orders();
        for order in &dropped {
            self.discard(&order.id, "competition ended");
        }
        error!(discarded = dropped.len(), "competition ended, aborting order processing");
        self.set_phase(None, OrderPhase::Aborted);
        self.outcome(false, dropped.into_iter().map(|o| o.id).collect())
    }

    fn complete(&mut self) -> SessionOutcome {
        info!(orders = self.reports.len(), "all orders processed");
        self.set_phase(None, OrderPhase::Completed);
        self.outcome(true, Vec::new())
    }

    fn outcome(&mut self, success: bool, discarded: Vec<String>) -> SessionOutcome {
        self.bus.emit(SOURCE, EventPayload::SessionFinished { success });
        SessionOutcome {
            success,
            reports: std::mem::take(&mut self.reports),
            discarded,
        }
    }
}
