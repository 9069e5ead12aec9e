/// Broad category of a [`DataError`], for callers that map failures to
/// user-visible behavior (HTTP status codes, retries, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller supplied invalid arguments; nothing reached the backend.
    Validation,
    /// The backend (or the connection to it) reported a failure.
    Backend,
    /// The operation is not supported by the provider.
    Unsupported,
}

/// Errors that can occur in the data layer.
///
/// There is no "not found" variant: lookups that match nothing return an
/// empty `QueryResult` or a `SingleResult` with `data: None`.
#[derive(Debug)]
pub enum DataError {
    /// Invalid pagination arguments, missing filters on update/delete, ...
    Validation(String),
    /// Any failure surfaced by the backend: network, constraint violation,
    /// permission, malformed raw statement.
    Backend(Box<dyn std::error::Error + Send + Sync>),
    /// A row returned by the backend does not match the requested shape.
    Decode(String),
    /// The provider does not support the requested operation.
    Unsupported(String),
    /// An operation was issued before `connect()` (or after `disconnect()`).
    NotConnected,
}

impl DataError {
    /// Construct a `Backend` variant from any error type.
    ///
    /// Used by provider crates (e.g. `rowkit-postgrest`) to wrap
    /// driver-specific errors.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        DataError::Backend(Box::new(err))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        DataError::Validation(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        DataError::Unsupported(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DataError::Validation(_) => ErrorKind::Validation,
            DataError::Unsupported(_) => ErrorKind::Unsupported,
            DataError::Backend(_) | DataError::Decode(_) | DataError::NotConnected => {
                ErrorKind::Backend
            }
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

impl std::fmt::Display for DataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::Validation(msg) => write!(f, "Invalid request: {msg}"),
            DataError::Backend(err) => write!(f, "Backend error: {err}"),
            DataError::Decode(msg) => write!(f, "Decode error: {msg}"),
            DataError::Unsupported(msg) => write!(f, "Unsupported operation: {msg}"),
            DataError::NotConnected => write!(f, "Provider is not connected"),
        }
    }
}

impl std::error::Error for DataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataError::Backend(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::Decode(err.to_string())
    }
}

/// Convenience alias for data-layer results.
pub type DataResult<T> = Result<T, DataError>;
