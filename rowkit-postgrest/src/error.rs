use rowkit_data::DataError;
use serde::Deserialize;

/// Extension trait for converting driver errors into `DataError`.
///
/// Due to Rust's orphan rules, we can't implement `From<reqwest::Error> for
/// DataError` in this crate. Use `.into_data_error()` instead.
pub trait TransportErrorExt {
    fn into_data_error(self) -> DataError;
}

impl TransportErrorExt for reqwest::Error {
    fn into_data_error(self) -> DataError {
        DataError::backend(self)
    }
}

impl TransportErrorExt for tokio_tungstenite::tungstenite::Error {
    fn into_data_error(self) -> DataError {
        DataError::backend(self)
    }
}

/// Error body returned by PostgREST (`{code, message, details, hint}`),
/// plus the HTTP status it came with.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendFailure {
    #[serde(skip)]
    pub status: Option<u16>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl BackendFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Parse a PostgREST error body; non-JSON bodies become the message.
    pub fn from_body(status: u16, body: &str) -> Self {
        let mut failure = serde_json::from_str::<BackendFailure>(body)
            .unwrap_or_else(|_| BackendFailure::new(body.trim()));
        if failure.message.is_empty() {
            failure.message = format!("request failed with status {status}");
        }
        failure.status = Some(status);
        failure
    }
}

impl std::fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(status) = self.status {
            write!(f, "[{status}] ")?;
        }
        if let Some(code) = &self.code {
            write!(f, "{code}: ")?;
        }
        write!(f, "{}", self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

impl std::error::Error for BackendFailure {}

impl From<BackendFailure> for DataError {
    fn from(failure: BackendFailure) -> Self {
        DataError::backend(failure)
    }
}
