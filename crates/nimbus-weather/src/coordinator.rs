//! Forecast coordinator: resolve a place, then fetch its forecast.
//!
//! Three flows publish independently on watch channels:
//! - name search (`search_by_name`)
//! - location search (`search_by_location`)
//! - forecast (`ensure_forecast`, also triggered by both searches)
//!
//! The last good forecast is memoized by coordinates; a request within
//! [`EPSILON`](crate::types::EPSILON) of the cached pair is served without a
//! network call. When two requests overlap on one flow, the one issued last
//! wins and the earlier completion is discarded.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::client::WeatherClient;
use crate::error::{ClientError, FailureReason};
use crate::outcome::RequestOutcome;
use crate::types::{Coordinates, Forecast, ResolvedLocation};

/// One request/result channel.
struct Flow<T> {
    name: &'static str,
    tx: watch::Sender<RequestOutcome<T>>,
    generation: AtomicU64,
}

impl<T> Flow<T> {
    fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(RequestOutcome::Idle);
        Self {
            name,
            tx,
            generation: AtomicU64::new(0),
        }
    }

    /// Start a request; earlier requests on this flow become stale.
    fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, ticket: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket
    }

    /// Publish unless superseded. Returns whether the value went out.
    fn publish(&self, ticket: u64, outcome: RequestOutcome<T>) -> bool {
        let published = self.tx.send_if_modified(|current| {
            if self.is_current(ticket) {
                *current = outcome;
                true
            } else {
                false
            }
        });
        if !published {
            tracing::debug!(flow = self.name, ticket, "Dropping stale result");
        }
        published
    }

    fn subscribe(&self) -> watch::Receiver<RequestOutcome<T>> {
        self.tx.subscribe()
    }
}

impl<T: Clone> Flow<T> {
    fn current(&self) -> RequestOutcome<T> {
        self.tx.borrow().clone()
    }
}

/// Session-scoped memo of the last good forecast.
#[derive(Debug, Default)]
struct CoordinatorState {
    coordinates: Option<Coordinates>,
    forecast: Option<Forecast>,
    location: Option<ResolvedLocation>,
}

impl CoordinatorState {
    /// The stored forecast, if it was fetched for (approximately) these coordinates.
    fn cached_for(&self, requested: &Coordinates) -> Option<Forecast> {
        match (&self.coordinates, &self.forecast) {
            (Some(cached), Some(forecast)) if cached.approx_eq(requested) => {
                Some(forecast.clone())
            }
            _ => None,
        }
    }

    fn store(&mut self, coordinates: Coordinates, forecast: Forecast) {
        self.coordinates = Some(coordinates);
        self.forecast = Some(forecast);
    }
}

/// Drives resolve-then-forecast and owns the forecast memo.
pub struct ForecastCoordinator {
    client: WeatherClient,
    state: Mutex<CoordinatorState>,
    name_flow: Flow<String>,
    location_flow: Flow<String>,
    forecast_flow: Flow<Forecast>,
}

impl ForecastCoordinator {
    pub fn new(client: WeatherClient) -> Self {
        Self {
            client,
            state: Mutex::new(CoordinatorState::default()),
            name_flow: Flow::new("name"),
            location_flow: Flow::new("location"),
            forecast_flow: Flow::new("forecast"),
        }
    }

    pub fn client(&self) -> &WeatherClient {
        &self.client
    }

    /// Search by city name, then load the forecast for the match.
    #[instrument(skip(self), level = "info")]
    pub async fn search_by_name(&self, name: &str) -> RequestOutcome<String> {
        let ticket = self.name_flow.begin();

        if name.trim().is_empty() {
            let outcome = RequestOutcome::Failed(FailureReason::EmptyQuery);
            self.name_flow.publish(ticket, outcome.clone());
            return outcome;
        }

        self.resolve_then_forecast(&self.name_flow, ticket, self.client.resolve_by_name(name))
            .await
    }

    /// Search by device coordinates, then load the forecast for the resolved place.
    #[instrument(skip(self), level = "info")]
    pub async fn search_by_location(&self, latitude: f64, longitude: f64) -> RequestOutcome<String> {
        let ticket = self.location_flow.begin();

        self.resolve_then_forecast(
            &self.location_flow,
            ticket,
            self.client.resolve_by_coordinates(latitude, longitude),
        )
        .await
    }

    async fn resolve_then_forecast<F>(
        &self,
        flow: &Flow<String>,
        ticket: u64,
        resolve: F,
    ) -> RequestOutcome<String>
    where
        F: Future<Output = Result<ResolvedLocation, ClientError>>,
    {
        flow.publish(ticket, RequestOutcome::Pending);

        let location = match resolve.await {
            Ok(location) => location,
            Err(e) => {
                tracing::warn!(flow = flow.name, "Resolve failed: {}", e);
                let outcome = RequestOutcome::Failed(FailureReason::from(e));
                flow.publish(ticket, outcome.clone());
                return outcome;
            }
        };

        let coordinates = location.coordinates;
        let outcome = RequestOutcome::Success(location.name.clone());

        if !flow.publish(ticket, outcome.clone()) {
            // A newer search owns the forecast now
            return outcome;
        }

        tracing::info!(
            "Resolved {} to ({}, {})",
            location.name,
            coordinates.latitude,
            coordinates.longitude
        );
        self.state.lock().location = Some(location);

        self.ensure_forecast(coordinates.latitude, coordinates.longitude)
            .await;
        outcome
    }

    /// Publish the forecast for these coordinates, fetching only when the memo can't serve it.
    ///
    /// A failed fetch leaves the memo untouched, so the next request for the
    /// same coordinates goes to the network again.
    #[instrument(skip(self), level = "info")]
    pub async fn ensure_forecast(&self, latitude: f64, longitude: f64) -> RequestOutcome<Forecast> {
        let requested = Coordinates::new(latitude, longitude);
        let ticket = self.forecast_flow.begin();

        let cached = self.state.lock().cached_for(&requested);
        if let Some(forecast) = cached {
            tracing::debug!("Serving cached forecast for ({}, {})", latitude, longitude);
            let outcome = RequestOutcome::Success(forecast);
            self.forecast_flow.publish(ticket, outcome.clone());
            return outcome;
        }

        self.forecast_flow.publish(ticket, RequestOutcome::Pending);

        match self.client.fetch_forecast(latitude, longitude).await {
            Ok(forecast) => {
                if self.forecast_flow.is_current(ticket) {
                    self.state.lock().store(requested, forecast.clone());
                }
                let outcome = RequestOutcome::Success(forecast);
                self.forecast_flow.publish(ticket, outcome.clone());
                outcome
            }
            Err(e) => {
                tracing::warn!("Forecast fetch failed: {}", e);
                let outcome = RequestOutcome::Failed(FailureReason::from(e));
                self.forecast_flow.publish(ticket, outcome.clone());
                outcome
            }
        }
    }

    /// Run [`search_by_name`](Self::search_by_name) on the current tokio runtime.
    pub fn spawn_search_by_name(
        self: &Arc<Self>,
        name: impl Into<String>,
    ) -> JoinHandle<RequestOutcome<String>> {
        let this = Arc::clone(self);
        let name = name.into();
        tokio::spawn(async move { this.search_by_name(&name).await })
    }

    /// Run [`search_by_location`](Self::search_by_location) on the current tokio runtime.
    pub fn spawn_search_by_location(
        self: &Arc<Self>,
        latitude: f64,
        longitude: f64,
    ) -> JoinHandle<RequestOutcome<String>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.search_by_location(latitude, longitude).await })
    }

    /// Run [`ensure_forecast`](Self::ensure_forecast) on the current tokio runtime.
    pub fn spawn_ensure_forecast(
        self: &Arc<Self>,
        latitude: f64,
        longitude: f64,
    ) -> JoinHandle<RequestOutcome<Forecast>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.ensure_forecast(latitude, longitude).await })
    }

    pub fn subscribe_name(&self) -> watch::Receiver<RequestOutcome<String>> {
        self.name_flow.subscribe()
    }

    pub fn subscribe_location(&self) -> watch::Receiver<RequestOutcome<String>> {
        self.location_flow.subscribe()
    }

    pub fn subscribe_forecast(&self) -> watch::Receiver<RequestOutcome<Forecast>> {
        self.forecast_flow.subscribe()
    }

    pub fn name_outcome(&self) -> RequestOutcome<String> {
        self.name_flow.current()
    }

    pub fn location_outcome(&self) -> RequestOutcome<String> {
        self.location_flow.current()
    }

    pub fn forecast_outcome(&self) -> RequestOutcome<Forecast> {
        self.forecast_flow.current()
    }

    /// Coordinates of the last successfully fetched forecast.
    pub fn cached_coordinates(&self) -> Option<Coordinates> {
        self.state.lock().coordinates
    }

    pub fn cached_forecast(&self) -> Option<Forecast> {
        self.state.lock().forecast.clone()
    }

    /// Most recent place returned by either search.
    pub fn last_location(&self) -> Option<ResolvedLocation> {
        self.state.lock().location.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use crate::types::EPSILON;
    use wiremock::matchers::{any, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn coordinator(server: &MockServer) -> ForecastCoordinator {
        let client = WeatherClient::new(ClientConfig::new(server.uri(), "test-key")).unwrap();
        ForecastCoordinator::new(client)
    }

    fn forecast_body(first_dt: i64) -> serde_json::Value {
        serde_json::json!({
            "daily": [
                {
                    "dt": first_dt,
                    "temp": {"day": 10.0, "night": 2.0},
                    "humidity": 80,
                    "wind_speed": 5.0,
                    "weather": [{"id": 600, "description": "snow", "icon": "13d"}]
                }
            ]
        })
    }

    async fn mount_forecast(server: &MockServer, lat: &str, first_dt: i64, times: u64) {
        Mock::given(method("GET"))
            .and(path("/data/2.5/onecall"))
            .and(query_param("lat", lat))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(first_dt)))
            .expect(times)
            .mount(server)
            .await;
    }

    #[test]
    fn test_state_requires_forecast_for_hit() {
        let mut state = CoordinatorState {
            coordinates: Some(Coordinates::new(1.0, 1.0)),
            ..Default::default()
        };
        assert!(state.cached_for(&Coordinates::new(1.0, 1.0)).is_none());

        state.store(Coordinates::new(1.0, 1.0), Forecast::default());
        assert!(state.cached_for(&Coordinates::new(1.0, 1.0)).is_some());
        assert!(state.cached_for(&Coordinates::new(1.0 + 1e-5, 1.0)).is_none());
    }

    #[test]
    fn test_flow_drops_stale_publish() {
        let flow: Flow<u32> = Flow::new("test");
        let first = flow.begin();
        let second = flow.begin();

        assert!(!flow.publish(first, RequestOutcome::Success(1)));
        assert_eq!(flow.current(), RequestOutcome::Idle);

        assert!(flow.publish(second, RequestOutcome::Success(2)));
        assert_eq!(flow.current(), RequestOutcome::Success(2));
    }

    #[tokio::test]
    async fn test_nearby_coordinates_served_from_cache() {
        let server = MockServer::start().await;
        mount_forecast(&server, "10", 100, 1).await;
        let coordinator = coordinator(&server);

        let first = coordinator.ensure_forecast(10.0, 20.0).await;
        assert!(first.is_success());

        let second = coordinator.ensure_forecast(10.0 + 5e-7, 20.0 - 5e-7).await;
        assert_eq!(second, first);
        assert_eq!(coordinator.forecast_outcome(), first);
    }

    #[tokio::test]
    async fn test_moved_coordinates_fetch_again() {
        let server = MockServer::start().await;
        mount_forecast(&server, "10", 100, 1).await;
        mount_forecast(&server, "10.00001", 200, 1).await;
        let coordinator = coordinator(&server);

        coordinator.ensure_forecast(10.0, 20.0).await;
        let moved = coordinator.ensure_forecast(10.00001, 20.0).await;

        assert_eq!(
            moved.success().and_then(|f| f.today()).map(|d| d.timestamp),
            Some(200)
        );
        assert_eq!(
            coordinator.cached_coordinates(),
            Some(Coordinates::new(10.00001, 20.0))
        );
    }

    #[tokio::test]
    async fn test_longitude_change_alone_fetches_again() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/onecall"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(100)))
            .expect(2)
            .mount(&server)
            .await;
        let coordinator = coordinator(&server);

        coordinator.ensure_forecast(10.0, 20.0).await;
        coordinator.ensure_forecast(10.0, 20.00001).await;
    }

    #[tokio::test]
    async fn test_offset_of_exactly_epsilon_fetches_again() {
        let server = MockServer::start().await;
        mount_forecast(&server, "0", 100, 1).await;
        mount_forecast(&server, "0.000001", 200, 1).await;
        let coordinator = coordinator(&server);

        coordinator.ensure_forecast(0.0, 0.0).await;
        let moved = coordinator.ensure_forecast(EPSILON, 0.0).await;

        assert_eq!(
            moved.success().and_then(|f| f.today()).map(|d| d.timestamp),
            Some(200)
        );
        assert_eq!(
            coordinator.cached_coordinates(),
            Some(Coordinates::new(EPSILON, 0.0))
        );
    }

    #[tokio::test]
    async fn test_forecast_404_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/onecall"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "cod": "404",
                "message": "Internal error"
            })))
            .expect(1)
            .mount(&server)
            .await;
        let coordinator = coordinator(&server);

        let outcome = coordinator.ensure_forecast(10.0, 20.0).await;
        assert_eq!(
            outcome,
            RequestOutcome::Failed(FailureReason::ProviderError("Internal error".into()))
        );
        assert_eq!(
            outcome.failure().map(|f| f.user_message()),
            Some("Weather service error. Please try again.")
        );
    }

    #[tokio::test]
    async fn test_empty_query_skips_network() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let coordinator = coordinator(&server);

        for query in ["", "   "] {
            let outcome = coordinator.search_by_name(query).await;
            assert_eq!(outcome, RequestOutcome::Failed(FailureReason::EmptyQuery));
        }
        assert_eq!(
            coordinator.name_outcome(),
            RequestOutcome::Failed(FailureReason::EmptyQuery)
        );
        assert_eq!(coordinator.forecast_outcome(), RequestOutcome::Idle);
    }

    #[tokio::test]
    async fn test_city_not_found_surfaces_location_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "cod": "404",
                "message": "city not found"
            })))
            .expect(1)
            .mount(&server)
            .await;
        let coordinator = coordinator(&server);

        let outcome = coordinator.search_by_name("Atlantis").await;
        assert_eq!(
            outcome,
            RequestOutcome::Failed(FailureReason::LocationNotFound)
        );
        assert_eq!(coordinator.forecast_outcome(), RequestOutcome::Idle);
        assert!(coordinator.last_location().is_none());
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_cache_and_retries() {
        let server = MockServer::start().await;
        mount_forecast(&server, "10", 100, 1).await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/onecall"))
            .and(query_param("lat", "30"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "cod": 500,
                "message": "Internal error"
            })))
            .expect(2)
            .mount(&server)
            .await;
        let coordinator = coordinator(&server);

        let good = coordinator.ensure_forecast(10.0, 20.0).await;

        let failed = coordinator.ensure_forecast(30.0, 40.0).await;
        assert_eq!(
            failed,
            RequestOutcome::Failed(FailureReason::ProviderError("Internal error".into()))
        );
        assert_eq!(coordinator.cached_coordinates(), Some(Coordinates::new(10.0, 20.0)));
        assert_eq!(coordinator.cached_forecast(), good.success().cloned());

        // Same coordinates again: the memo doesn't cover them, so it retries
        let retried = coordinator.ensure_forecast(30.0, 40.0).await;
        assert!(retried.failure().is_some());
    }

    #[tokio::test]
    async fn test_failure_without_prior_forecast_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/onecall"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;
        let coordinator = coordinator(&server);

        coordinator.ensure_forecast(1.0, 1.0).await;
        coordinator.ensure_forecast(1.0, 1.0).await;
        assert!(coordinator.cached_coordinates().is_none());
        assert!(coordinator.cached_forecast().is_none());
    }

    #[tokio::test]
    async fn test_search_by_location_loads_forecast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .and(query_param("lat", "59.9343"))
            .and(query_param("lon", "30.3351"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "coord": {"lat": 59.9386, "lon": 30.3141},
                "name": "Saint Petersburg",
                "sys": {"country": "RU"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_forecast(&server, "59.9386", 100, 1).await;
        let coordinator = coordinator(&server);

        let outcome = coordinator.search_by_location(59.9343, 30.3351).await;

        assert_eq!(outcome, RequestOutcome::Success("Saint Petersburg".to_string()));
        assert_eq!(coordinator.location_outcome(), outcome);
        assert_eq!(coordinator.name_outcome(), RequestOutcome::Idle);
        assert!(coordinator.forecast_outcome().is_success());
        // Forecast is keyed by the resolved coordinates, not the raw device fix
        assert_eq!(
            coordinator.cached_coordinates(),
            Some(Coordinates::new(59.9386, 30.3141))
        );
        assert_eq!(
            coordinator.last_location().and_then(|l| l.country),
            Some("RU".to_string())
        );
    }

    #[tokio::test]
    async fn test_network_failure_maps_to_network_unavailable() {
        let client =
            WeatherClient::new(ClientConfig::new("http://127.0.0.1:9", "test-key")).unwrap();
        let coordinator = ForecastCoordinator::new(client);

        let outcome = coordinator.search_by_location(1.0, 1.0).await;
        assert_eq!(
            outcome,
            RequestOutcome::Failed(FailureReason::NetworkUnavailable)
        );
    }

    #[tokio::test]
    async fn test_subscriber_sees_pending_then_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/onecall"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(forecast_body(100))
                    .set_delay(std::time::Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        let coordinator = Arc::new(coordinator(&server));
        let mut rx = coordinator.subscribe_forecast();

        let handle = coordinator.spawn_ensure_forecast(5.0, 5.0);

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_pending());

        let outcome = handle.await.unwrap();
        assert!(outcome.is_success());
        assert!(rx.borrow().is_success());
    }
}
