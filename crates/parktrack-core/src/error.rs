//! Unified error types for the parktrack core library.
//!
//! [`TrackerError`] covers every failure mode that can leave the core. Each
//! module keeps its own specific error type (`FrameError`, `StoreError`,
//! `ConfigError`, `LinkError`, `DirectionsError`) for internal use, and all
//! of them convert into [`TrackerError`].
//!
//! Most of these never surface at runtime: parse errors are dropped, link
//! errors become state transitions and persistence errors are logged. The
//! unified type exists for startup and for request/response consumers.
//!
//! # Example
//!
//! ```rust
//! use parktrack_core::error::{TrackerError, Result};
//!
//! fn require_location(found: bool) -> Result<()> {
//!     if !found {
//!         return Err(TrackerError::NoLocation);
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The unified error type for all parktrack operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No usable Bluetooth adapter.
    #[error("Bluetooth adapter unavailable: {0}. Ensure Bluetooth hardware is present and bluetoothd is running.")]
    BluetoothUnavailable(String),

    /// Bluetooth access denied to this process.
    #[error("Bluetooth access is not authorized. Grant access to the service user and restart.")]
    BluetoothUnauthorized,

    /// The adapter cannot do Bluetooth Low Energy.
    #[error("Bluetooth Low Energy is not supported on this adapter")]
    BluetoothUnsupported,

    /// The BLE stack reported a failure.
    #[error("Bluetooth error: {0}")]
    BluetoothError(String),

    // =========================================================================
    // LOCATION ERRORS
    // =========================================================================
    /// A notification payload could not be parsed.
    #[error("Malformed location frame: {0}")]
    InvalidFrame(String),

    /// A coordinate is outside the valid range.
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// No tracker location is known yet.
    #[error("No tracker location is known yet. Wait for the tracker to report its position.")]
    NoLocation,

    // =========================================================================
    // DIRECTIONS ERRORS
    // =========================================================================
    /// The directions service could not produce a route.
    #[error("Directions unavailable: {0}")]
    DirectionsFailed(String),

    /// No route exists between the two points.
    #[error("No walking route found to the vehicle")]
    NoRoute,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration could not be read or parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// Storing or loading the last location failed.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for parktrack operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

impl TrackerError {
    /// Returns `true` if this error is related to the BLE link.
    #[inline]
    #[must_use]
    pub const fn is_link_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothUnavailable(_)
                | Self::BluetoothUnauthorized
                | Self::BluetoothUnsupported
                | Self::BluetoothError(_)
        )
    }

    /// Returns `true` if recovery needs action outside this process.
    #[inline]
    #[must_use]
    pub const fn is_authorization_error(&self) -> bool {
        matches!(self, Self::BluetoothUnauthorized)
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_persistence_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if the condition heals on its own (next frame, rescan,
    /// or a retried route request).
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BluetoothError(_)
                | Self::InvalidFrame(_)
                | Self::NoLocation
                | Self::DirectionsFailed(_)
                | Self::NoRoute
                | Self::PersistenceError(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidFrame(_) | Self::InvalidCoordinate(_) => 400,

            // 403 Forbidden - needs out-of-band authorization
            Self::BluetoothUnauthorized => 403,

            // 404 Not Found
            Self::NoLocation | Self::NoRoute => 404,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 502 Bad Gateway - upstream directions service
            Self::DirectionsFailed(_) => 502,

            // 503 Service Unavailable - Bluetooth hardware issues
            Self::BluetoothUnavailable(_) | Self::BluetoothUnsupported | Self::BluetoothError(_) => {
                503
            }
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::BluetoothUnavailable(_) => "BLUETOOTH_UNAVAILABLE",
            Self::BluetoothUnauthorized => "BLUETOOTH_UNAUTHORIZED",
            Self::BluetoothUnsupported => "BLUETOOTH_UNSUPPORTED",
            Self::BluetoothError(_) => "BLUETOOTH_ERROR",
            Self::InvalidFrame(_) => "INVALID_FRAME",
            Self::InvalidCoordinate(_) => "INVALID_COORDINATE",
            Self::NoLocation => "NO_LOCATION",
            Self::DirectionsFailed(_) => "DIRECTIONS_FAILED",
            Self::NoRoute => "NO_ROUTE",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for TrackerError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        let message = err.to_string();
        match err {
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::NoConfigDir => Self::ConfigParseError(message),
            ConfigError::WriteError { .. } => Self::PersistenceError(message),
            ConfigError::ValidationError { .. } => Self::ConfigValidationError(message),
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::store::StoreError> for TrackerError {
    fn from(err: crate::store::StoreError) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

impl From<crate::frame::FrameError> for TrackerError {
    fn from(err: crate::frame::FrameError) -> Self {
        Self::InvalidFrame(err.to_string())
    }
}

impl From<crate::location::CoordinateError> for TrackerError {
    fn from(err: crate::location::CoordinateError) -> Self {
        Self::InvalidCoordinate(err.to_string())
    }
}

impl From<crate::bluetooth::LinkError> for TrackerError {
    fn from(err: crate::bluetooth::LinkError) -> Self {
        use crate::bluetooth::LinkError;
        let message = err.to_string();
        match err {
            LinkError::AdapterUnavailable(message) => Self::BluetoothUnavailable(message),
            LinkError::Unauthorized => Self::BluetoothUnauthorized,
            LinkError::Unsupported => Self::BluetoothUnsupported,
            LinkError::InvalidUuid(_) => Self::ConfigValidationError(message),
            LinkError::Stack(message) => Self::BluetoothError(message),
        }
    }
}

impl From<crate::directions::DirectionsError> for TrackerError {
    fn from(err: crate::directions::DirectionsError) -> Self {
        use crate::directions::DirectionsError;
        match &err {
            DirectionsError::NoRoute => Self::NoRoute,
            DirectionsError::InvalidUrl(_) => Self::ConfigValidationError(err.to_string()),
            DirectionsError::Http(_) | DirectionsError::Status { .. } | DirectionsError::Decode(_) => {
                Self::DirectionsFailed(err.to_string())
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
