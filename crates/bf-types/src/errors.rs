use thiserror::Error;

/// Main error type for the BeamFocus system
#[derive(Error, Debug)]
pub enum BfError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Image decode error: {path}: {message}")]
    ImageDecode { path: String, message: String },

    #[error("Invalid measurement: {value} ({reason})")]
    InvalidMeasurement { value: f64, reason: String },

    #[error("Division by zero: record value is zero, cannot compute relative delta")]
    DivisionByZero,

    #[error("Actuator publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BfError {
    /// Errors that abort only the current decision round; the controller
    /// keeps running after them.
    pub fn is_round_local(&self) -> bool {
        matches!(
            self,
            BfError::InvalidMeasurement { .. }
                | BfError::DivisionByZero
                | BfError::ImageDecode { .. }
        )
    }
}

/// Actuator transport errors
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Connection to {host} failed: {message}")]
    Connect { host: String, message: String },

    #[error("Authentication failed for user {user}: {reply}")]
    Authentication { user: String, reply: String },

    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },

    #[error("Transfer failed: {message}")]
    Transfer { message: String },

    #[error("Timed out after {seconds} seconds during {stage}")]
    Timeout { stage: String, seconds: u64 },

    #[error("Injected failure: {message}")]
    Injected { message: String },

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Result type alias for BeamFocus operations
pub type BfResult<T> = Result<T, BfError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::BfError::Config(format!($($arg)*))
    };
}

/// Macro for creating invalid-measurement errors
#[macro_export]
macro_rules! invalid_measurement {
    ($value:expr, $($arg:tt)*) => {
        $crate::BfError::InvalidMeasurement {
            value: $value,
            reason: format!($($arg)*),
        }
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::BfError::Internal(format!($($arg)*))
    };
}
