use thiserror::Error;

/// Main error type for the quantization engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuantError {
    /// Operation requires state the quantizer does not have yet
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Bad bitwidth, empty buffer, malformed encoding, ...
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Integer value outside a known enumeration
    #[error("Unsupported mode: {kind} value {value}")]
    UnsupportedMode {
        kind: &'static str,
        value: i32,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// IO errors
    #[error("IO error: {0}")]
    IoError(String),
}

impl QuantError {
    /// Create an invalid-argument error naming the offending parameter
    pub fn invalid_argument(parameter: &str, message: &str) -> Self {
        QuantError::InvalidArgument(format!("'{}': {}", parameter, message))
    }

    pub fn unsupported_mode(kind: &'static str, value: i32) -> Self {
        QuantError::UnsupportedMode { kind, value }
    }

    /// The single failure of `compute_encoding` on an empty summary
    pub fn no_statistics() -> Self {
        QuantError::InvalidState("no statistics collected".to_string())
    }
}

impl From<std::io::Error> for QuantError {
    fn from(err: std::io::Error) -> Self {
        QuantError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for QuantError {
    fn from(err: serde_json::Error) -> Self {
        QuantError::SerializationError(err.to_string())
    }
}

/// Result type for quantization operations
pub type QuantResult<T> = Result<T, QuantError>;

/// Error context for providing additional debugging information
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation: String,
    pub tensor_len: Option<usize>,
    pub bitwidth: Option<u32>,
    pub suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            tensor_len: None,
            bitwidth: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_tensor_len(mut self, len: usize) -> Self {
        self.tensor_len = Some(len);
        self
    }

    pub fn with_bitwidth(mut self, bitwidth: u32) -> Self {
        self.bitwidth = Some(bitwidth);
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestions.push(suggestion.to_string());
        self
    }

    pub fn to_error_message(&self) -> String {
        let mut message = format!("Operation: {}", self.operation);

        if let Some(len) = self.tensor_len {
            message.push_str(&format!("\nTensor length: {}", len));
        }

        if let Some(bitwidth) = self.bitwidth {
            message.push_str(&format!("\nBitwidth: {}", bitwidth));
        }

        if !self.suggestions.is_empty() {
            message.push_str("\nSuggestions:");
            for suggestion in &self.suggestions {
                message.push_str(&format!("\n  - {}", suggestion));
            }
        }

        message
    }
}

/// Helper trait for adding context to errors
pub trait WithContext<T> {
    fn with_context<F>(self, f: F) -> QuantResult<T>
    where
        F: FnOnce() -> ErrorContext;
}

impl<T> WithContext<T> for QuantResult<T> {
    fn with_context<F>(self, f: F) -> QuantResult<T>
    where
        F: FnOnce() -> ErrorContext,
    {
        self.map_err(|e| {
            let context = f();
            match e {
                QuantError::InvalidArgument(msg) => {
                    QuantError::InvalidArgument(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                QuantError::InvalidState(msg) => {
                    QuantError::InvalidState(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                _ => e,
            }
        })
    }
}

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidState,
    InvalidArgument,
    UnsupportedMode,
    ConfigInvalid,
    SerializationFailed,
    Io,
}

impl QuantError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            QuantError::InvalidState(_) => ErrorCode::InvalidState,
            QuantError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            QuantError::UnsupportedMode { .. } => ErrorCode::UnsupportedMode,
            QuantError::ConfigurationError(_) => ErrorCode::ConfigInvalid,
            QuantError::SerializationError(_) => ErrorCode::SerializationFailed,
            QuantError::IoError(_) => ErrorCode::Io,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            QuantError::InvalidState(msg) => {
                format!("Invalid State: {}\n\nCollect statistics with update_stats before computing an encoding, or use compute_encoding_from_data for one-shot calibration.", msg)
            }
            QuantError::InvalidArgument(msg) => {
                format!("Invalid Argument: {}\n\nCheck the bitwidth (1 to 32), the buffer lengths and the encoding range.", msg)
            }
            QuantError::UnsupportedMode { kind, value } => {
                format!("Unsupported Mode: {} has no variant for value {}.", kind, value)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_statistics_message() {
        let error = QuantError::no_statistics();
        assert_eq!(error.to_string(), "Invalid state: no statistics collected");
        assert_eq!(error.code(), ErrorCode::InvalidState);
    }

    #[test]
    fn test_error_context() {
        let result: QuantResult<()> = Err(QuantError::invalid_argument("bitwidth", "must be in [1, 32]"));
        let error = result
            .with_context(|| {
                ErrorContext::new("compute_encoding")
                    .with_tensor_len(16)
                    .with_bitwidth(40)
                    .with_suggestion("Use 8-bit encodings for activations")
            })
            .unwrap_err();

        let message = error.to_string();
        assert!(message.contains("'bitwidth': must be in [1, 32]"));
        assert!(message.contains("Operation: compute_encoding"));
        assert!(message.contains("Tensor length: 16"));
        assert!(message.contains("Bitwidth: 40"));
        assert!(message.contains("Use 8-bit encodings"));
    }

    #[test]
    fn test_error_codes() {
        let mode_error = QuantError::unsupported_mode("OpMode", 7);
        assert_eq!(mode_error.code(), ErrorCode::UnsupportedMode);
        assert!(mode_error.to_string().contains("OpMode value 7"));

        let io_error: QuantError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(io_error.code(), ErrorCode::Io);
    }

    #[test]
    fn test_user_message() {
        let message = QuantError::no_statistics().user_message();
        assert!(message.contains("Invalid State"));
        assert!(message.contains("update_stats"));
    }
}
