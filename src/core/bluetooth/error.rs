//! Typed errors for session and discovery operations.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by the underlying radio stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("radio backend error: {0}")]
    Backend(String),
    #[error("peripheral is not connected")]
    NotConnected,
}

/// Failure of a session `connect` request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// A connect or disconnect is already in flight; retry later.
    #[error("a connect or disconnect is already in progress")]
    Busy,
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("connect failed: {0}")]
    Radio(#[source] RadioError),
}

/// Failure of a session `disconnect` request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisconnectError {
    /// A connect or disconnect is already in flight; retry later.
    #[error("a connect or disconnect is already in progress")]
    Busy,
    #[error("disconnect timed out after {0:?}")]
    Timeout(Duration),
    #[error("disconnect failed: {0}")]
    Radio(#[source] RadioError),
}

/// Failure of a capability discovery pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoverError {
    #[error("peripheral is not connected")]
    NotConnected,
    #[error("capability discovery timed out after {0:?}")]
    Timeout(Duration),
    /// The peripheral does not expose the expected services and
    /// characteristics. Not retried: the device does not match the profile.
    #[error("unexpected gatt profile: {0}")]
    InvalidTopology(String),
    #[error("capability discovery failed: {0}")]
    Radio(#[source] RadioError),
}

/// Failure of a characteristic read or write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    #[error("session is not ready")]
    NotReady,
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed response from peripheral")]
    MalformedResponse,
    #[error("unexpected gatt profile: {0}")]
    InvalidTopology(String),
    #[error("radio error: {0}")]
    Radio(#[source] RadioError),
}

impl IoError {
    /// Transient connectivity failures are worth one reconnect-and-retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IoError::NotReady | IoError::Timeout(_) | IoError::Radio(_)
        )
    }
}

impl From<ConnectError> for IoError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::Busy => IoError::NotReady,
            ConnectError::Timeout(bound) => IoError::Timeout(bound),
            ConnectError::Radio(radio) => IoError::Radio(radio),
        }
    }
}

impl From<DiscoverError> for IoError {
    fn from(err: DiscoverError) -> Self {
        match err {
            DiscoverError::NotConnected => IoError::NotReady,
            DiscoverError::Timeout(bound) => IoError::Timeout(bound),
            DiscoverError::InvalidTopology(detail) => IoError::InvalidTopology(detail),
            DiscoverError::Radio(radio) => IoError::Radio(radio),
        }
    }
}

/// Failure of a discovery run before any scanning happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No devices configured; the caller should drop all tracked state.
    #[error("no devices configured")]
    Empty,
}
