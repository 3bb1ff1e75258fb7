use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Serialize, Serializer};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::modbus::connection::{read_phase, Connect, ReadError};
use crate::modbus::register::PhaseMeasurement;
use crate::modbus::Phase;

/// Pause between phases so the meter can recover before the next request.
pub const DEFAULT_PHASE_DELAY: Duration = Duration::from_millis(50);

/// Outcome of reading a single phase.
pub type PhaseReading = Result<PhaseMeasurement, ReadError>;

/// Everything read in one poll cycle. Always holds an entry for every [`Phase`].
#[derive(Debug, Serialize)]
pub struct Snapshot {
    /// Seconds since the Unix epoch at the end of the cycle.
    pub ts: f64,

    #[serde(serialize_with = "serialize_phases")]
    pub phases: BTreeMap<Phase, PhaseReading>,
}

impl Snapshot {
    pub fn measurement(&self, phase: Phase) -> Option<&PhaseMeasurement> {
        self.phases.get(&phase).and_then(|r| r.as_ref().ok())
    }

    pub fn error(&self, phase: Phase) -> Option<&ReadError> {
        self.phases.get(&phase).and_then(|r| r.as_ref().err())
    }
}

// Failed phases are kept in the output as `null`.
fn serialize_phases<S: Serializer>(
    phases: &BTreeMap<Phase, PhaseReading>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(
        phases
            .iter()
            .map(|(phase, reading)| (phase, reading.as_ref().ok())),
    )
}

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Owns the meter's bus. Poll cycles are serialised so that only one of them ever has a session
/// open, and every caller gets a snapshot of its own.
pub struct PollCoordinator<C> {
    connector: C,
    bus: Mutex<()>,
    phase_delay: Duration,
}

impl<C: Connect> PollCoordinator<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            bus: Mutex::new(()),
            phase_delay: DEFAULT_PHASE_DELAY,
        }
    }

    pub fn with_phase_delay(mut self, phase_delay: Duration) -> Self {
        self.phase_delay = phase_delay;
        self
    }

    /// Runs a cycle on its own task. Dropping the returned future does not abort a cycle which has
    /// already started talking to the bus.
    pub async fn poll(self: &Arc<Self>) -> crate::Result<Snapshot> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.poll_exclusive().await }).await?
    }

    /// Waits for the bus, then runs a cycle on the current task.
    pub async fn poll_exclusive(&self) -> crate::Result<Snapshot> {
        let _bus = self.bus.lock().await;
        debug!("Bus acquired");
        self.cycle().await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn cycle(&self) -> crate::Result<Snapshot> {
        let mut client = self.connector.connect().await?;
        let timeout = self.connector.transaction_timeout();

        let mut phases = BTreeMap::new();
        for (i, phase) in Phase::ALL.into_iter().enumerate() {
            if i > 0 && !self.phase_delay.is_zero() {
                tokio::time::sleep(self.phase_delay).await;
            }

            let reading = read_phase(&mut client, phase.unit(), timeout).await;
            match reading {
                Ok(ref measurement) => debug!(%phase, ?measurement, "Phase read"),
                Err(ref error) => warn!(%phase, kind = error.kind(), %error, "Phase read failed"),
            }
            phases.insert(phase, reading);
        }

        if let Err(error) = client.disconnect().await {
            warn!(%error, "Could not close serial session cleanly");
        }
        drop(client);

        let snapshot = Snapshot { ts: now(), phases };
        info!(
            ok = snapshot.phases.values().filter(|r| r.is_ok()).count(),
            "Poll cycle finished"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
use pretty_assertions::assert_eq;

#[test]
fn failed_phases_serialize_as_null() {
    use crate::modbus::register::decode;

    let mut phases = BTreeMap::new();
    phases.insert(
        Phase::L1,
        Ok(decode(&[2300, 1000, 0, 5000, 0, 0, 0, 500, 80, 0]).unwrap()),
    );
    phases.insert(Phase::L2, Err(ReadError::Timeout(Duration::from_secs(1))));
    phases.insert(Phase::L3, Ok(decode(&[0; 10]).unwrap()));
    let snapshot = Snapshot { ts: 12.5, phases };

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["ts"], 12.5);
    assert_eq!(json["phases"]["L1"]["voltage"], 230.0);
    assert!(json["phases"]["L2"].is_null());
    assert_eq!(json["phases"]["L3"]["power_full"], 0.0);
    assert_eq!(json["phases"].as_object().unwrap().len(), 3);

    assert!(snapshot.measurement(Phase::L2).is_none());
    assert!(matches!(
        snapshot.error(Phase::L2),
        Some(ReadError::Timeout(_))
    ));
}
