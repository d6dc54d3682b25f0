//! Attach-Confirmation Loop.
//!
//! After the gripper is enabled over a target, [`await_attach`] keeps
//! nudging the tool downward by `probe_step` until the gripper feed reports
//! an attachment or `timeout` elapses.
//!
//! * Probe motions are best effort: their result is logged and ignored.
//! * The probe height never increases.  Each probe goes `probe_step` below
//!   the lower of the current tool height and the previous probe.
//! * The deadline is checked before every probe, so the loop ends within
//!   `timeout` plus at most one probe motion.
//! * On timeout the gripper is left enabled; the caller decides what to do.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use kitcell_hal::MotionLimits;
use kitcell_middleware::StateStore;
use kitcell_perception::pose::Pose;
use kitcell_types::CellError;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::motion::ArmMotion;

/// Tuning for one confirmation attempt.
#[derive(Debug, Clone, Copy)]
pub struct AttachProbe {
    pub timeout: Duration,
    pub probe_step: f64,
    pub limits: MotionLimits,
    pub settle: Duration,
}

/// Outcome of a successful confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachReport {
    pub probes: Vec<Pose>,
    pub elapsed: Duration,
}

pub async fn await_attach(
    store: &StateStore,
    arm: &ArmMotion,
    probe: AttachProbe,
) -> Result<AttachReport, CellError> {
    let started = Instant::now();
    let deadline = started + probe.timeout;
    let log_gate: DefaultDirectRateLimiter = RateLimiter::direct(Quota::per_second(NonZeroU32::MIN));
    let mut probes: Vec<Pose> = Vec::new();

    loop {
        if store.gripper().attached {
            debug!(probes = probes.len(), "attach confirmed");
            return Ok(AttachReport {
                probes,
                elapsed: started.elapsed(),
            });
        }
        if Instant::now() >= deadline {
            info!(
                probes = probes.len(),
                timeout_secs = probe.timeout.as_secs_f64(),
                "unable to pick up object"
            );
            return Err(CellError::AttachTimeout {
                timeout_secs: probe.timeout.as_secs_f64(),
            });
        }
        if log_gate.check().is_ok() {
            info!("waiting for gripper attach");
        }

        let mut next = arm.current_pose().await?;
        if let Some(previous) = probes.last() {
            next.position.z = next.position.z.min(previous.position.z);
        }
        next.position.z -= probe.probe_step;

        if let Err(e) = arm.move_through(&[next], probe.limits).await {
            debug!(error = %e, "probe motion failed");
        }
        probes.push(next);

        let _ = tokio::time::timeout(
            probe.settle,
            store.wait_for_gripper(|g| g.attached),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MotionConfig;
    use kitcell_hal::{GripperController, SimCell, SimConfig};

    fn probe(timeout_ms: u64) -> AttachProbe {
        AttachProbe {
            timeout: Duration::from_millis(timeout_ms),
            probe_step: 0.001,
            limits: MotionLimits::new(0.1, 0.1),
            settle: Duration::from_micros(200),
        }
    }

    fn setup(attach_after_probes: Option<usize>) -> (StateStore, ArmMotion, std::sync::Arc<SimCell>) {
        let store = StateStore::new();
        let cell = SimCell::builder(store.clone())
            .with_config(SimConfig {
                attach_after_probes,
                ..SimConfig::default()
            })
            .build();
        let arm = ArmMotion::new(cell.clone(), &MotionConfig::default());
        (store, arm, cell)
    }

    #[tokio::test]
    async fn already_attached_returns_without_probing() {
        let (store, arm, cell) = setup(Some(0));
        cell.set_enabled(true).await.unwrap();
        let report = await_attach(&store, &arm, probe(100)).await.unwrap();
        assert!(report.probes.is_empty());
        assert!(cell.executed_paths().is_empty());
    }

    #[tokio::test]
    async fn attaches_after_a_few_probes() {
        let (store, arm, cell) = setup(Some(3));
        cell.set_enabled(true).await.unwrap();
        let report = await_attach(&store, &arm, probe(1_000)).await.unwrap();
        assert_eq!(report.probes.len(), 3);
        assert!(store.gripper().attached);
    }

    #[tokio::test]
    async fn probes_descend_monotonically() {
        let (store, arm, cell) = setup(Some(10));
        cell.set_enabled(true).await.unwrap();
        let start_z = arm.current_pose().await.unwrap().position.z;
        let report = await_attach(&store, &arm, probe(2_000)).await.unwrap();

        let mut last = start_z;
        for p in &report.probes {
            assert!(p.position.z < last, "probe rose: {} after {}", p.position.z, last);
            last = p.position.z;
        }
        assert!((start_z - last - 0.010).abs() < 1e-9);
    }

    #[tokio::test]
    async fn times_out_when_nothing_attaches() {
        let (store, arm, cell) = setup(None);
        cell.set_enabled(true).await.unwrap();

        let started = std::time::Instant::now();
        let err = await_attach(&store, &arm, probe(50)).await.unwrap_err();
        assert!(matches!(err, CellError::AttachTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!cell.executed_paths().is_empty());
        // Gripper stays enabled for the caller to handle.
        assert!(store.gripper().enabled);
    }
}
