//! AGV/Tray Lifecycle Tracker.
//!
//! Reads AGV locations from the [`StateStore`] and remembers which tray the
//! cell staged on which AGV.  [`AgvTracker::wait_until_at`] is the gate the
//! order loop blocks on before submitting.

use std::time::Duration;

use kitcell_middleware::StateStore;
use kitcell_types::{AgvId, AgvLocation, CellError};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct AgvTracker {
    store: StateStore,
    staged_trays: [Option<u8>; AgvId::COUNT],
}

impl AgvTracker {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            staged_trays: [None; AgvId::COUNT],
        }
    }

    pub fn location(&self, agv: AgvId) -> AgvLocation {
        self.store.agv_location(agv)
    }

    pub fn mark_tray_staged(&mut self, agv: AgvId, tray_id: u8) {
        debug!(%agv, tray_id, "tray staged");
        self.staged_trays[usize::from(agv.number() - 1)] = Some(tray_id);
    }

    pub fn staged_tray(&self, agv: AgvId) -> Option<u8> {
        self.staged_trays[usize::from(agv.number() - 1)]
    }

    /// The AGV left with its kit; its mount is free again.
    pub fn mark_departed(&mut self, agv: AgvId) {
        self.staged_trays[usize::from(agv.number() - 1)] = None;
    }

    /// Block until `agv` reports `location`.
    ///
    /// Fails with [`CellError::SessionEnded`] if the competition ends first,
    /// and with a service error if `timeout` elapses.
    pub async fn wait_until_at(
        &self,
        agv: AgvId,
        location: AgvLocation,
        timeout: Option<Duration>,
    ) -> Result<(), CellError> {
        let arrival = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, self.store.wait_for_agv(agv, location))
                    .await
                    .map_err(|_| {
                        CellError::service(
                            "agv_arrival",
                            format!("{agv} did not reach {location} within {:.1}s", limit.as_secs_f64()),
                        )
                    })?,
                None => self.store.wait_for_agv(agv, location).await,
            }
        };

        tokio::select! {
            result = arrival => {
                if result.is_ok() {
                    info!(%agv, %location, "agv arrived");
                }
                result
            }
            _ = self.store.session_ended() => Err(CellError::SessionEnded),
        }
    }
}
