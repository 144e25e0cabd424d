use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Tolerance under which two coordinates on the same axis count as one location.
pub const EPSILON: f64 = 1e-6;

const ICON_BASE_URL: &str = "https://openweathermap.org/img/wn";

/// Geographic position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both axes differ by less than [`EPSILON`].
    pub fn approx_eq(&self, other: &Coordinates) -> bool {
        (self.latitude - other.latitude).abs() < EPSILON
            && (self.longitude - other.longitude).abs() < EPSILON
    }

    /// Finite and within the usual latitude/longitude ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// One weather condition descriptor as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherCondition {
    pub id: i64,
    pub description: String,
    pub icon: String,
}

impl WeatherCondition {
    /// Provider-hosted image for this condition's icon code
    pub fn icon_url(&self) -> String {
        format!("{}/{}@2x.png", ICON_BASE_URL, self.icon)
    }
}

/// Observation returned alongside a resolve call.
///
/// Resolve calls carry no `units` parameter, so `temperature` is in Kelvin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temperature: f64,
    pub humidity: u8,
    pub wind_speed: f64,
    pub condition: Option<WeatherCondition>,
}

/// A place name together with its precise coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub name: String,
    pub coordinates: Coordinates,
    pub country: Option<String>,
    pub current: Option<CurrentConditions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayNightTemperature {
    pub day: f64,
    pub night: f64,
}

/// Daily forecast entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecastEntry {
    /// Unix timestamp (seconds) of the forecast day
    pub timestamp: i64,
    pub temperature: DayNightTemperature,
    /// Relative humidity, percent
    pub humidity: u8,
    pub wind_speed: f64,
    pub conditions: Vec<WeatherCondition>,
}

impl DailyForecastEntry {
    /// The descriptor shown for the day; the provider lists the dominant one first.
    pub fn primary_condition(&self) -> Option<&WeatherCondition> {
        self.conditions.first()
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }

    /// `dd/MM` label in the local time zone
    pub fn day_month_label(&self) -> Option<String> {
        self.day_month_label_in(&Local)
    }

    pub fn day_month_label_in<Tz>(&self, tz: &Tz) -> Option<String>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        self.date()
            .map(|d| d.with_timezone(tz).format("%d/%m").to_string())
    }
}

/// Multi-day forecast in provider order, today first
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Forecast {
    days: Vec<DailyForecastEntry>,
}

impl Forecast {
    pub fn new(days: Vec<DailyForecastEntry>) -> Self {
        Self { days }
    }

    pub fn today(&self) -> Option<&DailyForecastEntry> {
        self.days.first()
    }

    pub fn days(&self) -> &[DailyForecastEntry] {
        &self.days
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn into_days(self) -> Vec<DailyForecastEntry> {
        self.days
    }
}
