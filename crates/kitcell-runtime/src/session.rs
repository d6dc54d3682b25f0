//! Competition session control: start, run the order loop, end.

use std::sync::Arc;

use kitcell_hal::CellBackends;
use kitcell_middleware::{EventBus, StateStore};
use kitcell_types::{CellError, CompetitionState};
use tracing::{debug, info, warn};

use crate::config::CellConfig;
use crate::orders::{OrderProcessor, SessionOutcome, SharedSequencer};

/// Wait until the competition is ready, then ask for it to start.
///
/// A competition that is already running is left alone; one that ended
/// before it could be started is an error.
pub async fn start_competition(
    store: &StateStore,
    backends: &CellBackends,
) -> Result<(), CellError> {
    if store.competition() == CompetitionState::Idle {
        info!("waiting for competition to be ready");
    }
    let state = store
        .wait_for_competition(|s| s != CompetitionState::Idle)
        .await?;
    match state {
        CompetitionState::Ready => {
            backends.session.start_competition().await?;
            info!("competition started");
            Ok(())
        }
        CompetitionState::Ended => Err(CellError::SessionEnded),
        other => {
            debug!(state = ?other, "competition already running");
            Ok(())
        }
    }
}

pub async fn end_competition(
    store: &StateStore,
    backends: &CellBackends,
) -> Result<(), CellError> {
    if store.competition() == CompetitionState::Ended {
        debug!("competition already ended");
        return Ok(());
    }
    backends.session.end_competition().await?;
    info!("competition ended");
    Ok(())
}

/// Start the competition, process orders until the session is over and end
/// it.
pub async fn run_session(
    cfg: Arc<CellConfig>,
    store: StateStore,
    backends: CellBackends,
    bus: EventBus,
    sequencer: SharedSequencer,
) -> Result<SessionOutcome, CellError> {
    start_competition(&store, &backends).await?;

    let mut processor =
        OrderProcessor::new(cfg, store.clone(), backends.clone(), bus, sequencer);
    let outcome = processor.run().await;

    if let Err(e) = end_competition(&store, &backends).await {
        warn!(error = %e, "unable to end competition");
    }
    info!(success = outcome.success, "session finished");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::PickPlaceSequencer;
    use kitcell_hal::{SimCell, SimCommand, SimConfig};
    use kitcell_types::{AgvId, AgvLocation, KittingTask, Order};
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn setup() -> (StateStore, Arc<SimCell>, CellBackends) {
        let store = StateStore::new();
        let cell = SimCell::builder(store.clone())
            .with_config(SimConfig::default())
            .build();
        let backends = CellBackends::uniform(cell.clone());
        (store, cell, backends)
    }

    #[tokio::test]
    async fn start_waits_for_ready() {
        let (store, cell, backends) = setup();
        let feed = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            feed.set_competition(CompetitionState::Ready);
        });
        start_competition(&store, &backends).await.unwrap();
        assert_eq!(cell.commands(), vec![SimCommand::StartCompetition]);
        assert_eq!(store.competition(), CompetitionState::Started);
    }

    #[tokio::test]
    async fn start_after_end_is_an_error() {
        let (store, cell, backends) = setup();
        store.set_competition(CompetitionState::Ended);
        let err = start_competition(&store, &backends).await.unwrap_err();
        assert_eq!(err, CellError::SessionEnded);
        assert!(cell.commands().is_empty());
    }

    #[tokio::test]
    async fn end_is_skipped_when_already_ended() {
        let (store, cell, backends) = setup();
        store.set_competition(CompetitionState::Ended);
        end_competition(&store, &backends).await.unwrap();
        assert!(cell.commands().is_empty());
    }

    #[tokio::test]
    async fn full_session_with_one_empty_kit() {
        let (store, cell, backends) = setup();
        let cfg = Arc::new(CellConfig::default());
        let bus = EventBus::default();
        let sequencer = Arc::new(Mutex::new(PickPlaceSequencer::new(
            cfg.clone(),
            store.clone(),
            backends.clone(),
            bus.clone(),
        )));
        store.set_competition(CompetitionState::Ready);

        let feed = store.clone();
        tokio::spawn(async move {
            feed.wait_for_competition(|s| s == CompetitionState::Started)
                .await
                .unwrap();
            feed.push_order(Order::kitting(
                "k1",
                KittingTask {
                    agv: AgvId::new(4).unwrap(),
                    destination: AgvLocation::Warehouse,
                    tray_id: None,
                    parts: vec![],
                },
            ));
            feed.set_competition(CompetitionState::OrderAnnouncementsDone);
        });

        let outcome = run_session(cfg, store.clone(), backends, bus, sequencer)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(cell.submissions(), vec!["k1".to_string()]);
        assert_eq!(cell.commands().last(), Some(&SimCommand::EndCompetition));
        assert_eq!(store.competition(), CompetitionState::Ended);
    }
}
