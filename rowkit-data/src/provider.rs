use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;

use crate::error::DataError;
use crate::query::{CreateOptions, DeleteOptions, Filter, FindOptions, UpdateOptions};
use crate::result::{MutationResult, QueryResult, SingleResult};

/// Backend-independent data access contract.
///
/// Every fallible method returns a typed [`DataError`]. `find_one` is the
/// exception for "no rows": it returns `SingleResult { data: None }`.
///
/// Uses RPITIT (return-position `impl Trait` in traits), so implementors
/// can write plain `async fn`s.
pub trait DataProvider: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<(), DataError>> + Send;

    /// Release every realtime channel and mark the provider disconnected.
    fn disconnect(&self) -> impl Future<Output = Result<(), DataError>> + Send;

    /// Cheap local check; never a network round trip.
    fn is_connected(&self) -> bool;

    fn find<T>(
        &self,
        table: &str,
        options: &FindOptions,
    ) -> impl Future<Output = Result<QueryResult<T>, DataError>> + Send
    where
        T: DeserializeOwned + Send;

    fn find_one<T>(
        &self,
        table: &str,
        options: &FindOptions,
    ) -> impl Future<Output = Result<SingleResult<T>, DataError>> + Send
    where
        T: DeserializeOwned + Send;

    fn count(
        &self,
        table: &str,
        options: &FindOptions,
    ) -> impl Future<Output = Result<u64, DataError>> + Send;

    fn create<T, D>(
        &self,
        table: &str,
        data: &D,
        options: &CreateOptions,
    ) -> impl Future<Output = Result<MutationResult<T>, DataError>> + Send
    where
        T: DeserializeOwned + Send,
        D: Serialize + Sync + ?Sized;

    /// Update every row matching `options.filter`. An empty filter is a
    /// validation error.
    fn update<T, D>(
        &self,
        table: &str,
        data: &D,
        options: &UpdateOptions,
    ) -> impl Future<Output = Result<MutationResult<Vec<T>>, DataError>> + Send
    where
        T: DeserializeOwned + Send,
        D: Serialize + Sync + ?Sized;

    /// Delete every row matching `options.filter`: soft (sets `deleted_at`
    /// through the update path) or hard. An empty filter is a validation error.
    fn delete<T>(
        &self,
        table: &str,
        options: &DeleteOptions,
    ) -> impl Future<Output = Result<MutationResult<Vec<T>>, DataError>> + Send
    where
        T: DeserializeOwned + Send;

    /// Run a backend-native statement the declarative model cannot express.
    /// The statement is forwarded verbatim; malformed statements fail at the
    /// backend.
    fn raw<T>(
        &self,
        query: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<QueryResult<T>, DataError>> + Send
    where
        T: DeserializeOwned + Send;

    /// `count(filter) > 0`, consistent with `find` under the same filter.
    fn exists(
        &self,
        table: &str,
        filter: &Filter,
    ) -> impl Future<Output = Result<bool, DataError>> + Send {
        async move {
            let options = FindOptions::with_filter(filter.clone());
            Ok(self.count(table, &options).await? > 0)
        }
    }

    fn truncate(&self, table: &str) -> impl Future<Output = Result<(), DataError>> + Send;

    /// Client-driven multi-statement atomicity. Providers whose backend does
    /// not offer it return [`DataError::Unsupported`].
    fn begin_transaction(&self) -> impl Future<Output = Result<(), DataError>> + Send {
        async {
            Err(DataError::unsupported(
                "this provider does not support client-side transactions",
            ))
        }
    }
}
