//! Sequences location lookup, the weather request and decoding into one
//! refresh cycle, and reports progress to an observer.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::WeatherSource;
use crate::decode::decode;
use crate::error::{FetchError, LocationError};
use crate::location::LocationSource;
use crate::model::{Coordinate, FailureKind, FetchResult, WeatherSummary};
use crate::permission::{PermissionOutcome, PermissionPrompt, PermissionRetry, request_until_granted};

/// Receives refresh progress. Called on the task that runs the refresh.
pub trait FetchObserver: Send + Sync {
    fn on_fetch_started(&self) {}

    fn on_fetch_completed(&self, _result: &FetchResult) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl FetchObserver for NoopObserver {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    Started,
    Completed(FetchResult),
}

/// Forwards events to a channel so the embedding can consume them on its own thread.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<FetchEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FetchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FetchObserver for ChannelObserver {
    fn on_fetch_started(&self) {
        // Receiver gone means nobody is displaying results any more.
        let _ = self.tx.send(FetchEvent::Started);
    }

    fn on_fetch_completed(&self, result: &FetchResult) {
        let _ = self.tx.send(FetchEvent::Completed(result.clone()));
    }
}

struct Inner {
    location: Arc<dyn LocationSource>,
    weather: Arc<dyn WeatherSource>,
    observer: Arc<dyn FetchObserver>,
    prompt: Option<Arc<dyn PermissionPrompt>>,
    retry: PermissionRetry,
    last_coordinate: Mutex<Coordinate>,
    in_flight: AtomicBool,
    prompting: AtomicBool,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FetchOrchestrator {
    inner: Arc<Inner>,
}

pub struct FetchOrchestratorBuilder {
    location: Arc<dyn LocationSource>,
    weather: Arc<dyn WeatherSource>,
    observer: Arc<dyn FetchObserver>,
    prompt: Option<Arc<dyn PermissionPrompt>>,
    retry: PermissionRetry,
}

impl FetchOrchestratorBuilder {
    pub fn observer(mut self, observer: Arc<dyn FetchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Lets a refresh that finds permission missing ask for it in the background.
    ///
    /// This is for embeddings that do not prompt on their own before calling
    /// [`FetchOrchestrator::refresh`]. The request is spawned on the current
    /// tokio runtime; outside one it is skipped with a warning. Without a
    /// prompt, a missing permission only makes the refresh fall back to the
    /// last known coordinate.
    pub fn permission_prompt(mut self, prompt: Arc<dyn PermissionPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn permission_retry(mut self, retry: PermissionRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> FetchOrchestrator {
        FetchOrchestrator {
            inner: Arc::new(Inner {
                location: self.location,
                weather: self.weather,
                observer: self.observer,
                prompt: self.prompt,
                retry: self.retry,
                last_coordinate: Mutex::new(Coordinate::UNSET),
                in_flight: AtomicBool::new(false),
                prompting: AtomicBool::new(false),
            }),
        }
    }
}

/// Clears the in-flight flag however the refresh ends, including cancellation.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FetchOrchestrator {
    pub fn builder(
        location: Arc<dyn LocationSource>,
        weather: Arc<dyn WeatherSource>,
    ) -> FetchOrchestratorBuilder {
        FetchOrchestratorBuilder {
            location,
            weather,
            observer: Arc::new(NoopObserver),
            prompt: None,
            retry: PermissionRetry::default(),
        }
    }

    /// Coordinate used by the latest refresh, or `Coordinate::UNSET` before any fix.
    pub fn last_coordinate(&self) -> Coordinate {
        *self.inner.last_coordinate.lock()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Runs one fetch cycle.
    ///
    /// While another refresh is running this returns a `Busy` failure at once
    /// and the observer is not notified.
    pub async fn refresh(&self) -> FetchResult {
        let Some(_guard) = InFlightGuard::acquire(&self.inner.in_flight) else {
            tracing::debug!("refresh rejected, another one is in flight");
            return FetchResult::failure(FailureKind::Busy, "A refresh is already in progress");
        };

        self.inner.observer.on_fetch_started();

        let coord = self.read_coordinate();
        let result = match self.fetch(coord).await {
            Ok(summary) => {
                tracing::info!(
                    city = summary.city(),
                    temperature_f = summary.temperature_f(),
                    "weather updated"
                );
                FetchResult::Success(summary)
            }
            Err(err) => {
                tracing::warn!(error = %err, %coord, "weather fetch failed");
                err.into()
            }
        };

        self.inner.observer.on_fetch_completed(&result);
        result
    }

    /// Runs [`refresh`](Self::refresh) on a tokio worker.
    pub fn spawn_refresh(&self) -> JoinHandle<FetchResult> {
        let this = self.clone();
        tokio::spawn(async move { this.refresh().await })
    }

    async fn fetch(&self, coord: Coordinate) -> Result<WeatherSummary, FetchError> {
        let raw = self.inner.weather.fetch_raw(coord).await?;
        Ok(decode(&raw)?)
    }

    fn read_coordinate(&self) -> Coordinate {
        match self.inner.location.last_known_position() {
            Ok(coord) => {
                *self.inner.last_coordinate.lock() = coord;
                coord
            }
            Err(err) => {
                if err == LocationError::PermissionDenied {
                    self.request_permission();
                }
                // Proceeds with a stale or sentinel coordinate instead of waiting for a fix.
                let fallback = *self.inner.last_coordinate.lock();
                tracing::warn!(error = %err, %fallback, "no fresh location, using last known coordinate");
                fallback
            }
        }
    }

    /// Starts a background permission request unless one is already running.
    /// A grant re-reads the location so the next refresh can use it.
    fn request_permission(&self) {
        let Some(prompt) = self.inner.prompt.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime, not requesting location permission");
            return;
        };
        if self
            .inner
            .prompting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            if request_until_granted(prompt.as_ref(), inner.retry).await == PermissionOutcome::Granted {
                match inner.location.last_known_position() {
                    Ok(coord) => *inner.last_coordinate.lock() = coord,
                    Err(err) => tracing::debug!(error = %err, "no fix after permission grant"),
                }
            }
            inner.prompting.store(false, Ordering::Release);
        });
    }
}

impl fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("location", &self.inner.location)
            .field("weather", &self.inner.weather)
            .field("retry", &self.inner.retry)
            .field("last_coordinate", &self.last_coordinate())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::location::{LocationAdapter, LocationPlatform, StaticPlatform};
    use crate::model::Fix;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    const TESTVILLE: &str =
        r#"{"name":"Testville","main":{"temp":"290"},"weather":[{"description":"clear sky"}]}"#;

    #[derive(Debug)]
    struct FixedLocation(Result<Coordinate, LocationError>);

    impl LocationSource for FixedLocation {
        fn last_known_position(&self) -> Result<Coordinate, LocationError> {
            self.0.clone()
        }
    }

    /// Replies with a canned body and records every coordinate it was asked for.
    #[derive(Debug)]
    struct CannedWeather {
        body: Option<String>,
        seen: Mutex<Vec<Coordinate>>,
    }

    impl CannedWeather {
        fn ok(body: &str) -> Arc<Self> {
            Arc::new(Self { body: Some(body.to_string()), seen: Mutex::new(Vec::new()) })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { body: None, seen: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl WeatherSource for CannedWeather {
        async fn fetch_raw(&self, coord: Coordinate) -> Result<String, TransportError> {
            self.seen.lock().push(coord);
            self.body
                .clone()
                .ok_or_else(|| TransportError::InvalidUrl("unreachable host".into()))
        }
    }

    /// Holds every request until released.
    #[derive(Debug, Default)]
    struct GatedWeather {
        gate: Notify,
    }

    #[async_trait]
    impl WeatherSource for GatedWeather {
        async fn fetch_raw(&self, _coord: Coordinate) -> Result<String, TransportError> {
            self.gate.notified().await;
            Ok(TESTVILLE.to_string())
        }
    }

    #[derive(Debug)]
    struct GrantingPrompt(Arc<StaticPlatform>);

    #[async_trait]
    impl PermissionPrompt for GrantingPrompt {
        async fn request(&self, _request_id: u32) -> PermissionOutcome {
            self.0.grant();
            PermissionOutcome::Granted
        }
    }

    #[tokio::test]
    async fn end_to_end_success() {
        let weather = CannedWeather::ok(TESTVILLE);
        let orch = FetchOrchestrator::builder(
            Arc::new(FixedLocation(Ok(Coordinate::new(37, -122)))),
            weather.clone(),
        )
        .build();

        let result = orch.refresh().await;

        assert_eq!(
            result,
            FetchResult::Success(WeatherSummary::new("Testville".into(), 63, "clear sky".into()))
        );
        assert_eq!(*weather.seen.lock(), vec![Coordinate::new(37, -122)]);
        assert_eq!(orch.last_coordinate(), Coordinate::new(37, -122));
    }

    #[tokio::test]
    async fn unavailable_location_still_requests_with_sentinel() {
        let weather = CannedWeather::ok(TESTVILLE);
        let orch = FetchOrchestrator::builder(
            Arc::new(FixedLocation(Err(LocationError::NoFix))),
            weather.clone(),
        )
        .build();

        let result = orch.refresh().await;

        assert!(result.is_success());
        assert_eq!(*weather.seen.lock(), vec![Coordinate::UNSET]);
        assert_eq!(orch.last_coordinate(), Coordinate::UNSET);
    }

    #[tokio::test]
    async fn unavailable_location_passes_transport_failure_through() {
        let weather = CannedWeather::failing();
        let orch = FetchOrchestrator::builder(
            Arc::new(FixedLocation(Err(LocationError::PermissionDenied))),
            weather.clone(),
        )
        .build();

        let result = orch.refresh().await;

        assert_eq!(result.failure_kind(), Some(FailureKind::Transport));
        assert_eq!(*weather.seen.lock(), vec![Coordinate::UNSET]);
    }

    #[tokio::test]
    async fn stale_coordinate_is_reused_when_location_disappears() {
        let platform = Arc::new(
            StaticPlatform::new(true).with_provider("gps", Some(Fix::new(48.85, 2.35))),
        );
        let weather = CannedWeather::ok(TESTVILLE);
        let orch = FetchOrchestrator::builder(
            Arc::new(LocationAdapter::new(Arc::clone(&platform))),
            weather.clone(),
        )
        .build();

        orch.refresh().await;
        platform.register("gps", None);
        orch.refresh().await;

        assert_eq!(
            *weather.seen.lock(),
            vec![Coordinate::new(48, 2), Coordinate::new(48, 2)]
        );
    }

    #[tokio::test]
    async fn decode_failures_are_reported() {
        let orch = FetchOrchestrator::builder(
            Arc::new(FixedLocation(Ok(Coordinate::new(1, 1)))),
            CannedWeather::ok(r#"{"name":"X","main":{"temp":"1"}}"#),
        )
        .build();
        let result = orch.refresh().await;
        assert_eq!(result.failure_kind(), Some(FailureKind::MissingField));

        let orch = FetchOrchestrator::builder(
            Arc::new(FixedLocation(Ok(Coordinate::new(1, 1)))),
            CannedWeather::ok(r#"{"name":"X","#),
        )
        .build();
        let result = orch.refresh().await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Malformed));
    }

    #[tokio::test]
    async fn observer_sees_start_then_completion() {
        let (observer, mut rx) = ChannelObserver::new();
        let orch = FetchOrchestrator::builder(
            Arc::new(FixedLocation(Ok(Coordinate::new(37, -122)))),
            CannedWeather::ok(TESTVILLE),
        )
        .observer(Arc::new(observer))
        .build();

        let result = orch.refresh().await;

        assert_eq!(rx.recv().await, Some(FetchEvent::Started));
        assert_eq!(rx.recv().await, Some(FetchEvent::Completed(result)));
    }

    #[tokio::test]
    async fn failed_refresh_can_be_retried_by_caller() {
        let (observer, mut rx) = ChannelObserver::new();
        let orch = FetchOrchestrator::builder(
            Arc::new(FixedLocation(Ok(Coordinate::new(0, 0)))),
            CannedWeather::failing(),
        )
        .observer(Arc::new(observer))
        .build();

        for _ in 0..2 {
            let result = orch.refresh().await;
            assert_eq!(result.failure_kind(), Some(FailureKind::Transport));
            assert_eq!(rx.recv().await, Some(FetchEvent::Started));
            assert!(matches!(rx.recv().await, Some(FetchEvent::Completed(_))));
        }
        assert!(!orch.is_refreshing());
    }

    #[tokio::test]
    async fn concurrent_refresh_is_rejected() {
        let weather = Arc::new(GatedWeather::default());
        let (observer, mut rx) = ChannelObserver::new();
        let orch = FetchOrchestrator::builder(
            Arc::new(FixedLocation(Ok(Coordinate::new(37, -122)))),
            weather.clone(),
        )
        .observer(Arc::new(observer))
        .build();

        let first = orch.spawn_refresh();
        assert_eq!(rx.recv().await, Some(FetchEvent::Started));
        assert!(orch.is_refreshing());

        let second = orch.refresh().await;
        assert_eq!(second.failure_kind(), Some(FailureKind::Busy));

        weather.gate.notify_one();
        let first = first.await.unwrap();
        assert!(first.is_success());

        // The rejected refresh produced no events of its own.
        assert_eq!(rx.recv().await, Some(FetchEvent::Completed(first)));
        assert!(rx.try_recv().is_err());
        assert!(!orch.is_refreshing());
    }

    #[tokio::test]
    async fn cancelled_refresh_releases_the_in_flight_flag() {
        let weather = Arc::new(GatedWeather::default());
        let orch = FetchOrchestrator::builder(
            Arc::new(FixedLocation(Ok(Coordinate::new(1, 1)))),
            weather.clone(),
        )
        .build();

        let pending = tokio::time::timeout(Duration::from_millis(10), orch.refresh()).await;
        assert!(pending.is_err());
        assert!(!orch.is_refreshing());
    }

    #[test]
    fn refresh_outside_a_runtime_skips_the_permission_request() {
        let platform = Arc::new(
            StaticPlatform::new(false).with_provider("gps", Some(Fix::new(1.0, 1.0))),
        );
        let weather = CannedWeather::ok(TESTVILLE);
        let orch = FetchOrchestrator::builder(
            Arc::new(LocationAdapter::new(Arc::clone(&platform))),
            weather.clone(),
        )
        .permission_prompt(Arc::new(GrantingPrompt(Arc::clone(&platform))))
        .build();

        // Every step completes without suspending, so one poll is enough.
        let mut refresh = std::pin::pin!(orch.refresh());
        let mut cx = std::task::Context::from_waker(std::task::Waker::noop());
        let result = match std::future::Future::poll(refresh.as_mut(), &mut cx) {
            std::task::Poll::Ready(result) => result,
            std::task::Poll::Pending => panic!("refresh should not suspend here"),
        };

        assert!(result.is_success());
        assert_eq!(*weather.seen.lock(), vec![Coordinate::UNSET]);
        assert!(!platform.has_permission());
    }

    #[tokio::test]
    async fn permission_grant_feeds_the_next_refresh() {
        let platform = Arc::new(
            StaticPlatform::new(false).with_provider("gps", Some(Fix::new(37.77, -122.42))),
        );
        let weather = CannedWeather::ok(TESTVILLE);
        let orch = FetchOrchestrator::builder(
            Arc::new(LocationAdapter::new(Arc::clone(&platform))),
            weather.clone(),
        )
        .permission_prompt(Arc::new(GrantingPrompt(Arc::clone(&platform))))
        .permission_retry(PermissionRetry::Forever)
        .build();

        orch.refresh().await;

        tokio::time::timeout(Duration::from_secs(1), async {
            while orch.last_coordinate() != Coordinate::new(37, -122) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("permission task should update the coordinate");

        orch.refresh().await;

        assert_eq!(
            *weather.seen.lock(),
            vec![Coordinate::UNSET, Coordinate::new(37, -122)]
        );
    }
}
