use thiserror::Error;

/// Failure talking to a device on the gym LAN
///
/// Display strings travel back to the server as the `error` of an
/// `AgentResponse`, so they name the device.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
    #[error("Device {0} unreachable")]
    Unreachable(String),

    #[error("Device {0} did not answer in time")]
    Timeout(String),

    #[error("Device {0} rejected the credentials")]
    AuthRejected(String),

    #[error("Device answered HTTP {0}: {1}")]
    Status(u16, String),

    #[error("Unexpected device answer: {0}")]
    Malformed(String),
}

impl DeviceError {
    /// Classify a transport failure for `target`
    pub fn from_reqwest(target: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeviceError::Timeout(target.to_string())
        } else if err.is_decode() {
            DeviceError::Malformed(err.to_string())
        } else {
            tracing::debug!("Request to {} failed: {}", target, err);
            DeviceError::Unreachable(target.to_string())
        }
    }
}

/// Why a command could not be carried out
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid data for {action}: {reason}")]
    InvalidData { action: String, reason: String },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl DispatchError {
    pub fn invalid(action: impl Into<String>, reason: impl ToString) -> Self {
        DispatchError::InvalidData {
            action: action.into(),
            reason: reason.to_string(),
        }
    }
}
