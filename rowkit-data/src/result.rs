use serde::Serialize;

/// Rows returned by a read, with the total row count when it was requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult<T> {
    pub data: Vec<T>,
    pub count: Option<u64>,
}

impl<T> QueryResult<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self { data, count: None }
    }

    pub fn with_count(data: Vec<T>, count: u64) -> Self {
        Self {
            data,
            count: Some(count),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_first(self) -> Option<T> {
        self.data.into_iter().next()
    }
}

/// Zero or one row. `data: None` is a successful "not found".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SingleResult<T> {
    pub data: Option<T>,
}

impl<T> SingleResult<T> {
    pub fn found(&self) -> bool {
        self.data.is_some()
    }
}

/// Outcome of a write: the returned representation and the number of rows
/// the backend reported as affected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationResult<T> {
    pub data: T,
    pub affected: u64,
}

impl<T> MutationResult<Vec<T>> {
    /// Collapse a multi-row result into its first row (for id-targeted writes).
    pub fn into_single(self) -> MutationResult<Option<T>> {
        MutationResult {
            affected: self.affected,
            data: self.data.into_iter().next(),
        }
    }
}
