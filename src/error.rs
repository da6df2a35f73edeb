//! Unified error handling for the route-sentinel library.
//!
//! Data-quality problems (coarse fixes, missing readings) are not errors:
//! they surface as `None` from the fusion and proximity layers. This type
//! covers provider failures, stale asynchronous responses and bad input.

use std::fmt;

/// Unified error type for route-sentinel operations.
#[derive(Debug, Clone, PartialEq)]
pub enum NavError {
    /// Polyline has too few vertices for the operation
    InsufficientPoints {
        context: String,
        point_count: usize,
        minimum_required: usize,
    },
    /// Coordinates outside the valid WGS84 range or non-finite
    InvalidCoordinates { latitude: f64, longitude: f64 },
    /// Location/orientation provider denied or unavailable
    ProviderUnavailable { provider: String, message: String },
    /// HTTP/network failure talking to a remote service
    Network {
        message: String,
        status_code: Option<u16>,
    },
    /// Asynchronous response for a route that is no longer active
    StaleResponse { expected: u64, actual: u64 },
    /// Router returned no usable route
    NoRoute,
    /// Operation needs a destination and none is set
    NoDestination,
    /// Operation needs a fused position and none is known yet
    NoPosition,
    /// Payload could not be decoded
    Parse { message: String },
    /// Configuration error
    Config { message: String },
}

impl fmt::Display for NavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavError::InsufficientPoints {
                context,
                point_count,
                minimum_required,
            } => {
                write!(
                    f,
                    "{} has {} points, minimum {} required",
                    context, point_count, minimum_required
                )
            }
            NavError::InvalidCoordinates {
                latitude,
                longitude,
            } => {
                write!(f, "Invalid coordinates ({}, {})", latitude, longitude)
            }
            NavError::ProviderUnavailable { provider, message } => {
                write!(f, "{} unavailable: {}", provider, message)
            }
            NavError::Network {
                message,
                status_code,
            } => {
                if let Some(code) = status_code {
                    write!(f, "Network error ({}): {}", code, message)
                } else {
                    write!(f, "Network error: {}", message)
                }
            }
            NavError::StaleResponse { expected, actual } => {
                write!(
                    f,
                    "Stale response for route version {}, active version is {}",
                    actual, expected
                )
            }
            NavError::NoRoute => write!(f, "No route found"),
            NavError::NoDestination => write!(f, "No destination set"),
            NavError::NoPosition => write!(f, "Current position unknown"),
            NavError::Parse { message } => write!(f, "Parse error: {}", message),
            NavError::Config { message } => write!(f, "Configuration error: {}", message),
        }
    }
}

impl std::error::Error for NavError {}

impl From<serde_json::Error> for NavError {
    fn from(err: serde_json::Error) -> Self {
        NavError::Parse {
            message: err.to_string(),
        }
    }
}

impl From<csv::Error> for NavError {
    fn from(err: csv::Error) -> Self {
        NavError::Parse {
            message: err.to_string(),
        }
    }
}

/// Result type alias for route-sentinel operations.
pub type Result<T> = std::result::Result<T, NavError>;

/// Extension trait for converting Option to NavError.
pub trait OptionExt<T> {
    /// Convert Option to Result with insufficient points error.
    fn ok_or_insufficient_points(self, context: &str, point_count: usize, minimum: usize)
        -> Result<T>;

    /// Convert Option to Result with a no-route error.
    fn ok_or_no_route(self) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_insufficient_points(
        self,
        context: &str,
        point_count: usize,
        minimum: usize,
    ) -> Result<T> {
        self.ok_or_else(|| NavError::InsufficientPoints {
            context: context.to_string(),
            point_count,
            minimum_required: minimum,
        })
    }

    fn ok_or_no_route(self) -> Result<T> {
        self.ok_or(NavError::NoRoute)
    }
}
