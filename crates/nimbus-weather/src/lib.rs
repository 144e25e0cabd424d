//! Weather lookup for Nimbus
//!
//! Resolves a city name or device coordinates through OpenWeatherMap, then
//! loads the daily forecast for the resolved place.

pub mod client;
pub mod coordinator;
pub mod error;
pub mod outcome;
pub mod types;

pub use client::{ClientConfig, WeatherClient};
pub use coordinator::ForecastCoordinator;
pub use error::{ClientError, FailureReason, InvalidInput};
pub use outcome::RequestOutcome;
pub use types::*;
