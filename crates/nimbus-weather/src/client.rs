//! OpenWeatherMap client: two resolve calls and the daily forecast.

use std::sync::Arc;
use std::time::Duration;

use nimbus_core::WeatherConfig;
use reqwest::StatusCode;
use tracing::instrument;

use crate::error::{is_not_found_message, ClientError, InvalidInput};
use crate::types::{Coordinates, Forecast, ResolvedLocation};

const WEATHER_PATH: &str = "data/2.5/weather";
const ONECALL_PATH: &str = "data/2.5/onecall";
const FORECAST_EXCLUDE: &str = "minutely,hourly,alerts";

/// Which kind of call a response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    /// Name or coordinate resolve; a 404 means no such place.
    Place,
    /// Daily forecast; every rejection is a provider error.
    Forecast,
}

/// Immutable connection settings for [`WeatherClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub lang: String,
    pub units: String,
    pub timeout: Duration,
}

impl ClientConfig {
    /// Settings with the default language, units and timeout.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let defaults = WeatherConfig::default();
        let timeout = defaults.request_timeout();
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            lang: defaults.lang,
            units: defaults.units,
            timeout,
        }
    }
}

impl From<&WeatherConfig> for ClientConfig {
    fn from(config: &WeatherConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            lang: config.lang.clone(),
            units: config.units.clone(),
            timeout: config.request_timeout(),
        }
    }
}

/// Stateless typed client; every call is exactly one GET, no retries.
#[derive(Debug, Clone)]
pub struct WeatherClient {
    client: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl WeatherClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Resolve a city name to its display name and coordinates.
    #[instrument(skip(self), level = "info")]
    pub async fn resolve_by_name(&self, name: &str) -> Result<ResolvedLocation, ClientError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(InvalidInput::BlankName.into());
        }

        let response = self
            .client
            .get(self.endpoint(WEATHER_PATH))
            .query(&[
                ("q", name),
                ("appid", self.config.api_key.as_str()),
                ("lang", self.config.lang.as_str()),
            ])
            .send()
            .await?;

        let body: wire::CurrentWeatherResponse =
            self.handle_response(response, Lookup::Place).await?;
        Ok(body.into())
    }

    /// Resolve raw device coordinates to the nearest named place.
    #[instrument(skip(self), level = "info")]
    pub async fn resolve_by_coordinates(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<ResolvedLocation, ClientError> {
        let (lat, lon) = coordinate_params(latitude, longitude)?;

        let response = self
            .client
            .get(self.endpoint(WEATHER_PATH))
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("appid", self.config.api_key.as_str()),
                ("lang", self.config.lang.as_str()),
            ])
            .send()
            .await?;

        let body: wire::CurrentWeatherResponse =
            self.handle_response(response, Lookup::Place).await?;
        Ok(body.into())
    }

    /// Fetch the daily forecast, today first.
    #[instrument(skip(self), level = "info")]
    pub async fn fetch_forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Forecast, ClientError> {
        let (lat, lon) = coordinate_params(latitude, longitude)?;

        let response = self
            .client
            .get(self.endpoint(ONECALL_PATH))
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("exclude", FORECAST_EXCLUDE),
                ("appid", self.config.api_key.as_str()),
                ("lang", self.config.lang.as_str()),
                ("units", self.config.units.as_str()),
            ])
            .send()
            .await?;

        let body: wire::OneCallResponse = self.handle_response(response, Lookup::Forecast).await?;
        let forecast = Forecast::new(body.daily.into_iter().map(Into::into).collect());
        tracing::debug!("Fetched {} forecast days", forecast.len());
        Ok(forecast)
    }

    /// Helper to handle API responses and errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
        lookup: Lookup,
    ) -> Result<T, ClientError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text)
                .map_err(|e| ClientError::Decode(format!("JSON parse error: {}", e)))
        } else {
            let err = provider_error(status, &text, lookup);
            tracing::debug!("Provider rejected request: {}", err);
            Err(err)
        }
    }
}

fn coordinate_params(latitude: f64, longitude: f64) -> Result<(String, String), InvalidInput> {
    if !Coordinates::new(latitude, longitude).is_valid() {
        return Err(InvalidInput::Coordinates {
            latitude,
            longitude,
        });
    }
    Ok((latitude.to_string(), longitude.to_string()))
}

fn provider_error(status: StatusCode, body: &str, lookup: Lookup) -> ClientError {
    let message = serde_json::from_str::<wire::ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string())
        });

    let not_found = match lookup {
        Lookup::Place => status == StatusCode::NOT_FOUND || is_not_found_message(&message),
        Lookup::Forecast => false,
    };

    if not_found {
        ClientError::NotFound(message)
    } else {
        ClientError::Provider {
            status: status.as_u16(),
            message,
        }
    }
}

/// Provider JSON shapes.
mod wire {
    use serde::Deserialize;

    use crate::types::{
        Coordinates, CurrentConditions, DailyForecastEntry, DayNightTemperature,
        ResolvedLocation, WeatherCondition,
    };

    #[derive(Debug, Deserialize)]
    pub struct ErrorBody {
        pub message: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Coord {
        pub lat: f64,
        pub lon: f64,
    }

    #[derive(Debug, Deserialize)]
    pub struct Condition {
        pub id: i64,
        #[serde(default)]
        pub description: String,
        #[serde(default)]
        pub icon: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct Sys {
        pub country: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Main {
        pub temp: f64,
        #[serde(default)]
        pub humidity: u8,
    }

    #[derive(Debug, Deserialize)]
    pub struct Wind {
        #[serde(default)]
        pub speed: f64,
    }

    #[derive(Debug, Deserialize)]
    pub struct CurrentWeatherResponse {
        pub coord: Coord,
        #[serde(default)]
        pub name: String,
        pub sys: Option<Sys>,
        pub main: Option<Main>,
        pub wind: Option<Wind>,
        #[serde(default)]
        pub weather: Vec<Condition>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Temp {
        pub day: f64,
        pub night: f64,
    }

    #[derive(Debug, Deserialize)]
    pub struct Day {
        pub dt: i64,
        pub temp: Temp,
        pub humidity: u8,
        pub wind_speed: f64,
        #[serde(default)]
        pub weather: Vec<Condition>,
    }

    #[derive(Debug, Deserialize)]
    pub struct OneCallResponse {
        #[serde(default)]
        pub daily: Vec<Day>,
    }

    impl From<Condition> for WeatherCondition {
        fn from(c: Condition) -> Self {
            Self {
                id: c.id,
                description: c.description,
                icon: c.icon,
            }
        }
    }

    impl From<Day> for DailyForecastEntry {
        fn from(day: Day) -> Self {
            Self {
                timestamp: day.dt,
                temperature: DayNightTemperature {
                    day: day.temp.day,
                    night: day.temp.night,
                },
                humidity: day.humidity,
                wind_speed: day.wind_speed,
                conditions: day.weather.into_iter().map(Into::into).collect(),
            }
        }
    }

    impl From<CurrentWeatherResponse> for ResolvedLocation {
        fn from(body: CurrentWeatherResponse) -> Self {
            let coordinates = Coordinates::new(body.coord.lat, body.coord.lon);

            // Open water and remote points come back without a name
            let name = if body.name.trim().is_empty() {
                format!("{:.4}, {:.4}", coordinates.latitude, coordinates.longitude)
            } else {
                body.name
            };

            let condition = body.weather.into_iter().next().map(WeatherCondition::from);
            let wind_speed = body.wind.map(|w| w.speed).unwrap_or_default();
            let current = body.main.map(|main| CurrentConditions {
                temperature: main.temp,
                humidity: main.humidity,
                wind_speed,
                condition,
            });

            Self {
                name,
                coordinates,
                country: body.sys.and_then(|s| s.country).filter(|c| !c.is_empty()),
                current,
            }
        }
    }
}
