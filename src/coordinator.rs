//! Polling coordinator
//!
//! Fetches a complete reading from the gateway on a fixed interval and
//! publishes it as the current snapshot. A failed refresh leaves the previous
//! snapshot in place and only raises the `update failed` flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PowerwallConfig;
use crate::errors::RefreshError;
use crate::normalizer::Normalizer;
use crate::powerwall::source::fetch_payload;
use crate::powerwall::ReadingSource;
use crate::reading::{PowerUnit, Reading};

/// The latest published reading, `None` before the first successful refresh
pub type Snapshot = Option<Arc<Reading>>;

/// Coordinator settings
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub interval: Duration,
    pub unit: PowerUnit,
    pub device_timestamp: bool,
}

impl From<&PowerwallConfig> for CoordinatorSettings {
    fn from(config: &PowerwallConfig) -> Self {
        Self {
            interval: config.interval,
            unit: config.unit,
            device_timestamp: config.device_timestamp,
        }
    }
}

/// Read-only view of a coordinator's snapshot
#[derive(Clone)]
pub struct SnapshotReader {
    snapshot: watch::Receiver<Snapshot>,
    update_failed: Arc<AtomicBool>,
}

impl SnapshotReader {
    pub fn current(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Whether the most recent refresh failed
    pub fn last_update_failed(&self) -> bool {
        self.update_failed.load(Ordering::Acquire)
    }
}

pub struct Coordinator<S: ReadingSource> {
    source: Arc<S>,
    settings: CoordinatorSettings,
    normalizer: Normalizer,
    snapshot: watch::Sender<Snapshot>,
    update_failed: Arc<AtomicBool>,
    refresh_lock: Mutex<()>,
}

impl<S: ReadingSource> Coordinator<S> {
    pub fn new(source: S, settings: CoordinatorSettings) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            source: Arc::new(source),
            settings,
            normalizer: Normalizer::new(settings.unit),
            snapshot,
            update_failed: Arc::new(AtomicBool::new(false)),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn current_snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn last_update_failed(&self) -> bool {
        self.update_failed.load(Ordering::Acquire)
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            snapshot: self.snapshot.subscribe(),
            update_failed: Arc::clone(&self.update_failed),
        }
    }

    /// Fetch, normalize and publish one reading.
    ///
    /// Refreshes are serialized; a call made while another is in flight waits
    /// for it to finish first.
    pub async fn refresh(&self) -> Result<Arc<Reading>, RefreshError> {
        let _guard = self.refresh_lock.lock().await;

        match self.fetch().await {
            Ok(reading) => {
                let reading = Arc::new(reading);
                self.snapshot.send_replace(Some(Arc::clone(&reading)));
                if self.update_failed.swap(false, Ordering::AcqRel) {
                    info!("Powerwall refresh recovered");
                }
                debug!(
                    "Reading: Solar={:.0}W Battery={:.0}W Grid={:.0}W Home={:.0}W SOC={:.1}% at {}",
                    reading.solar_watts,
                    reading.battery_watts,
                    reading.grid_watts,
                    reading.home_watts,
                    reading.state_of_charge_percent,
                    reading.observed_at
                );
                Ok(reading)
            }
            Err(e) => {
                self.update_failed.store(true, Ordering::Release);
                warn!("Powerwall refresh failed, keeping previous snapshot: {}", e);
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<Reading, RefreshError> {
        let source = Arc::clone(&self.source);
        let device_timestamp = self.settings.device_timestamp;

        let payload = tokio::task::spawn_blocking(move || fetch_payload(&*source, device_timestamp))
            .await
            .map_err(|e| RefreshError::Worker(e.to_string()))??;

        Ok(self.normalizer.normalize(&payload, Utc::now())?)
    }

    /// Run the first refresh and start the background polling task.
    ///
    /// Fails when the first refresh fails, so that no consumer starts on an
    /// empty snapshot.
    pub async fn start(self: Arc<Self>) -> Result<CoordinatorHandle, RefreshError> {
        if let Err(e) = self.refresh().await {
            error!("Initial Powerwall refresh failed: {}", e);
            return Err(e);
        }
        Ok(self.spawn())
    }

    /// Start the background polling task without an initial refresh
    pub fn spawn(self: Arc<Self>) -> CoordinatorHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let task = tokio::spawn(async move { self.run(cancelled).await });
        CoordinatorHandle { token, task }
    }

    async fn run(&self, cancelled: CancellationToken) {
        let mut ticker = time::interval_at(
            time::Instant::now() + self.settings.interval,
            self.settings.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => break,
                _ = ticker.tick() => {
                    // Failures are logged and flagged inside refresh; the next tick retries.
                    let _ = self.refresh().await;
                }
            }
        }
        debug!("Coordinator polling stopped");
    }
}

/// Owns the background polling task
pub struct CoordinatorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Stop polling. A refresh in flight is allowed to complete.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            error!("Coordinator task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SourceError;
    use crate::powerwall::{RawPower, RawSolarVerbose, RawStateOfCharge};
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Copy, PartialEq)]
    enum Step {
        Ok,
        FailPower,
        FailGrid,
        FailSoc,
        NoSolar,
    }

    struct FakeSource {
        step: StdMutex<Step>,
        solar_w: StdMutex<f64>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                step: StdMutex::new(Step::Ok),
                solar_w: StdMutex::new(1500.0),
                calls: AtomicUsize::new(0),
            }
        }

        fn step(&self) -> Step {
            *self.step.lock().unwrap()
        }

        fn transport(endpoint: &str) -> SourceError {
            SourceError::Transport {
                endpoint: endpoint.to_string(),
                reason: "timed out".to_string(),
            }
        }
    }

    impl ReadingSource for FakeSource {
        fn power(&self) -> Result<RawPower, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.step() == Step::FailPower {
                return Err(Self::transport("power"));
            }
            Ok(RawPower {
                solar: Some(*self.solar_w.lock().unwrap()),
                battery: Some(2000.0),
                load: Some(3500.0),
            })
        }

        fn grid(&self) -> Result<f64, SourceError> {
            if self.step() == Step::FailGrid {
                return Err(Self::transport("grid"));
            }
            Ok(-1000.0)
        }

        fn state_of_charge(&self) -> Result<RawStateOfCharge, SourceError> {
            if self.step() == Step::FailSoc {
                return Err(Self::transport("soe"));
            }
            Ok(RawStateOfCharge {
                percentage: Some(75.5),
            })
        }

        fn solar_verbose(&self) -> Result<Option<RawSolarVerbose>, SourceError> {
            if self.step() == Step::NoSolar {
                return Ok(None);
            }
            Ok(Some(RawSolarVerbose {
                last_communication_time: Some("2023-05-01T12:00:00Z".to_string()),
            }))
        }
    }

    fn settings() -> CoordinatorSettings {
        CoordinatorSettings {
            interval: Duration::from_secs(60),
            unit: PowerUnit::Watts,
            device_timestamp: true,
        }
    }

    #[tokio::test]
    async fn test_empty_before_first_refresh() {
        let coordinator = Coordinator::new(FakeSource::new(), settings());
        assert!(coordinator.current_snapshot().is_none());
        assert!(!coordinator.last_update_failed());
    }

    #[tokio::test]
    async fn test_refresh_publishes_reading() {
        let coordinator = Coordinator::new(FakeSource::new(), settings());
        let reader = coordinator.reader();
        coordinator.refresh().await.unwrap();

        let reading = reader.current().unwrap();
        assert_eq!(reading.solar_watts, 1500.0);
        assert_eq!(reading.battery_watts, 2000.0);
        assert_eq!(reading.home_watts, 3500.0);
        assert_eq!(reading.grid_watts, -1000.0);
        assert_eq!(reading.state_of_charge_percent, 75.5);
        assert_eq!(
            reading.observed_at,
            Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_snapshot() {
        let coordinator = Coordinator::new(FakeSource::new(), settings());
        coordinator.refresh().await.unwrap();
        let before = coordinator.current_snapshot().unwrap();

        for step in [Step::FailPower, Step::FailGrid, Step::FailSoc, Step::NoSolar] {
            *coordinator.source.step.lock().unwrap() = step;
            *coordinator.source.solar_w.lock().unwrap() = 9999.0;

            assert!(coordinator.refresh().await.is_err());
            assert!(coordinator.last_update_failed());
            let after = coordinator.current_snapshot().unwrap();
            assert_eq!(*after, *before);
            assert!(Arc::ptr_eq(&after, &before));
        }
    }

    #[tokio::test]
    async fn test_missing_solar_record_fails_refresh() {
        let source = FakeSource::new();
        *source.step.lock().unwrap() = Step::NoSolar;
        let coordinator = Coordinator::new(source, settings());

        let err = coordinator.refresh().await.unwrap_err();
        assert!(matches!(err, RefreshError::Source(SourceError::NoData(_))));
        assert!(coordinator.current_snapshot().is_none());
    }

    #[tokio::test]
    async fn test_solar_record_not_needed_without_device_timestamp() {
        let source = FakeSource::new();
        *source.step.lock().unwrap() = Step::NoSolar;
        let coordinator = Coordinator::new(
            source,
            CoordinatorSettings {
                device_timestamp: false,
                ..settings()
            },
        );

        let before = Utc::now();
        let reading = coordinator.refresh().await.unwrap();
        assert!(reading.observed_at >= before);
    }

    #[tokio::test]
    async fn test_recovery_clears_failure_flag() {
        let coordinator = Coordinator::new(FakeSource::new(), settings());
        *coordinator.source.step.lock().unwrap() = Step::FailGrid;
        assert!(coordinator.refresh().await.is_err());
        assert!(coordinator.reader().last_update_failed());

        *coordinator.source.step.lock().unwrap() = Step::Ok;
        coordinator.refresh().await.unwrap();
        assert!(!coordinator.reader().last_update_failed());
    }

    #[tokio::test]
    async fn test_start_fails_when_first_refresh_fails() {
        let source = FakeSource::new();
        *source.step.lock().unwrap() = Step::FailSoc;
        let coordinator = Arc::new(Coordinator::new(source, settings()));

        assert!(Arc::clone(&coordinator).start().await.is_err());
        assert!(coordinator.current_snapshot().is_none());
    }

    /// Source that holds each power fetch open and records the overlap
    #[derive(Default)]
    struct SlowSource {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl ReadingSource for SlowSource {
        fn power(&self) -> Result<RawPower, SourceError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(RawPower {
                solar: Some(1500.0),
                battery: Some(2000.0),
                load: Some(3500.0),
            })
        }

        fn grid(&self) -> Result<f64, SourceError> {
            Ok(-1000.0)
        }

        fn state_of_charge(&self) -> Result<RawStateOfCharge, SourceError> {
            Ok(RawStateOfCharge {
                percentage: Some(75.5),
            })
        }

        fn solar_verbose(&self) -> Result<Option<RawSolarVerbose>, SourceError> {
            Ok(None)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refreshes_run_one_at_a_time() {
        let coordinator = Coordinator::new(
            SlowSource::default(),
            CoordinatorSettings {
                device_timestamp: false,
                ..settings()
            },
        );

        let (a, b, c) = tokio::join!(
            coordinator.refresh(),
            coordinator.refresh(),
            coordinator.refresh()
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(coordinator.source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(coordinator.source.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_polling_and_shutdown() {
        let coordinator = Arc::new(Coordinator::new(FakeSource::new(), settings()));
        let handle = Arc::clone(&coordinator).start().await.unwrap();
        assert_eq!(coordinator.source.calls.load(Ordering::SeqCst), 1);

        *coordinator.source.solar_w.lock().unwrap() = 800.0;
        time::sleep(Duration::from_secs(61)).await;
        // Let the spawned blocking fetch complete.
        for _ in 0..100 {
            if coordinator.source.calls.load(Ordering::SeqCst) >= 2
                && coordinator.current_snapshot().unwrap().solar_watts == 800.0
            {
                break;
            }
            tokio::task::yield_now().await;
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(coordinator.current_snapshot().unwrap().solar_watts, 800.0);

        handle.shutdown().await;
        let calls = coordinator.source.calls.load(Ordering::SeqCst);
        time::sleep(Duration::from_secs(600)).await;
        assert_eq!(coordinator.source.calls.load(Ordering::SeqCst), calls);
    }
}
