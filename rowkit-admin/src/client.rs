use rowkit_data::{
    ChangeHandler, DataError, DataProvider, Entity, QueryResult, RealtimeProvider, Repository,
    SubscribeOptions, Subscription,
};
use rowkit_postgrest::{HttpTransport, MemoryTransport, PostgrestConfig, PostgrestProvider};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::account_repository::AccountRepository;
use crate::organization_repository::OrganizationRepository;

/// Entry point bundling one provider with the domain repositories.
///
/// Construct it once and pass it (or an `Arc` of it) to whatever needs data
/// access. Every repository shares the same provider.
///
/// # Example
///
/// ```ignore
/// let client = DataClient::from_config(PostgrestConfig::load("prod")?)?;
/// client.connect().await?;
/// let acme = client.organizations().find_by_slug("acme").await?;
/// ```
pub struct DataClient<P> {
    provider: Arc<P>,
    accounts: AccountRepository<P>,
    organizations: OrganizationRepository<P>,
}

impl DataClient<PostgrestProvider<HttpTransport>> {
    pub fn from_config(config: PostgrestConfig) -> Result<Self, DataError> {
        Ok(Self::new(Arc::new(PostgrestProvider::http(config)?)))
    }
}

impl DataClient<PostgrestProvider<MemoryTransport>> {
    /// Client over a fresh in-memory backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(PostgrestProvider::in_memory()))
    }
}

impl<P: DataProvider> DataClient<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            accounts: AccountRepository::new(provider.clone()),
            organizations: OrganizationRepository::new(provider.clone()),
            provider,
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn accounts(&self) -> &AccountRepository<P> {
        &self.accounts
    }

    pub fn organizations(&self) -> &OrganizationRepository<P> {
        &self.organizations
    }

    /// Generic repository for any other entity.
    pub fn repository<T: Entity>(&self) -> Repository<T, P> {
        Repository::new(self.provider.clone())
    }

    pub async fn connect(&self) -> Result<(), DataError> {
        self.provider.connect().await
    }

    pub async fn disconnect(&self) -> Result<(), DataError> {
        self.provider.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.provider.is_connected()
    }

    pub async fn raw<T>(&self, query: &str, params: &[Value]) -> Result<QueryResult<T>, DataError>
    where
        T: DeserializeOwned + Send,
    {
        self.provider.raw(query, params).await
    }

    /// Run `f` against this client.
    ///
    /// Not a transaction: each operation inside `f` commits on its own and
    /// nothing is rolled back when `f` fails part-way. Work that must be
    /// atomic belongs in a database function called through [`raw`](Self::raw).
    pub async fn run_non_atomic<'a, F, Fut, R>(&'a self, f: F) -> Result<R, DataError>
    where
        F: FnOnce(&'a Self) -> Fut,
        Fut: Future<Output = Result<R, DataError>> + 'a,
    {
        f(self).await
    }
}

impl<P: DataProvider + RealtimeProvider> DataClient<P> {
    pub async fn subscribe(
        &self,
        table: &str,
        options: SubscribeOptions,
        handler: ChangeHandler,
    ) -> Result<Subscription, DataError> {
        self.provider.subscribe(table, options, handler).await
    }

    pub async fn unsubscribe_all(&self) {
        self.provider.unsubscribe_all().await
    }
}
