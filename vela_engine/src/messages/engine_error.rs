use thiserror::Error;

/// The error surface of the engine core. Every fallible path inside the
/// pipeline and the algorithm manager resolves to one of these variants.
///
/// # Variants
/// * `Cancelled` - a blocking primitive observed the shared cancellation token.
/// * `InvalidSource` - a data source was missing or unreadable, the reader continues with the next date.
/// * `ReaderError` - a single line failed to parse, the line is dropped.
/// * `UserCallbackError` - a user handler returned an error or panicked, fatal for the algorithm.
/// * `TimeLimitExceeded` - the per-iteration time monitor reported trouble.
/// * `Configuration` - bad settings at startup, aborts before any slice is produced.
#[derive(Clone, Error, Debug, PartialEq, Eq)]
pub enum VelaError {
    #[error("Cancelled")]
    Cancelled,
    #[error("InvalidSource: {0}")]
    InvalidSource(String),
    #[error("ReaderError: {0}")]
    ReaderError(String),
    #[error("UserCallbackError: {0}")]
    UserCallbackError(String),
    #[error("TimeLimitExceeded: {0}")]
    TimeLimitExceeded(String),
    #[error("Configuration: {0}")]
    Configuration(String),
    #[error("UnsupportedSecurityType: {0}")]
    UnsupportedSecurityType(String),
    /// Anything that does not fit the variants above, the debug message is provided as `String`.
    #[error("EngineErrorDebug: {0}")]
    EngineErrorDebug(String),
}
