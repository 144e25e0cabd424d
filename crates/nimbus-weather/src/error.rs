//! Client and flow error types.

use nimbus_core::{AppError, NetworkError, ReqwestErrorExt, WeatherError};
use thiserror::Error;

/// Provider messages that mean "valid request, no such place".
const NOT_FOUND_MESSAGES: &[&str] = &["city not found", "nothing to geocode"];

/// Input rejected before any request is made.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidInput {
    #[error("city name is empty")]
    BlankName,

    #[error("coordinates out of range: ({latitude}, {longitude})")]
    Coordinates { latitude: f64, longitude: f64 },
}

/// Errors returned by [`crate::WeatherClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),

    #[error("Location not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

/// Whether a provider error message reports a missing location.
pub fn is_not_found_message(message: &str) -> bool {
    let normalized = message.trim().to_lowercase();
    NOT_FOUND_MESSAGES.contains(&normalized.as_str())
}

/// Why a flow ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("empty search query")]
    EmptyQuery,

    #[error("location not found")]
    LocationNotFound,

    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl FailureReason {
    /// User-facing text; reasons without a dedicated message get the generic one.
    pub fn user_message(&self) -> &'static str {
        AppError::from(self.clone()).user_message()
    }
}

impl From<ClientError> for FailureReason {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::InvalidInput(InvalidInput::BlankName) => FailureReason::EmptyQuery,
            ClientError::InvalidInput(other) => FailureReason::Unknown(other.to_string()),
            ClientError::NotFound(_) => FailureReason::LocationNotFound,
            ClientError::Network(e) => match e.into_network_error() {
                NetworkError::InvalidResponse(msg) => FailureReason::Unknown(msg),
                _ => FailureReason::NetworkUnavailable,
            },
            ClientError::Provider { message, .. } if is_not_found_message(&message) => {
                FailureReason::LocationNotFound
            }
            ClientError::Provider { message, .. } => FailureReason::ProviderError(message),
            ClientError::Decode(msg) => FailureReason::Unknown(msg),
        }
    }
}

impl From<FailureReason> for AppError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::EmptyQuery => AppError::Weather(WeatherError::EmptyQuery),
            FailureReason::LocationNotFound => {
                AppError::Weather(WeatherError::LocationNotFound("no matching place".into()))
            }
            FailureReason::NetworkUnavailable => AppError::Network(
                NetworkError::ConnectionFailed("network unavailable".into()),
            ),
            FailureReason::ProviderError(msg) if msg.to_lowercase().contains("invalid api key") => {
                AppError::Weather(WeatherError::InvalidApiKey)
            }
            FailureReason::ProviderError(msg) => AppError::Weather(WeatherError::ApiError(msg)),
            FailureReason::Unknown(desc) => AppError::Other(anyhow::anyhow!(desc)),
        }
    }
}
