use serde::Serialize;
use serde_json::json;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use crate::entity::{Entity, SoftDeletable, DELETED_AT};
use crate::error::DataError;
use crate::page::{Page, Pageable};
use crate::provider::DataProvider;
use crate::query::{CreateOptions, DeleteOptions, Filter, FindOptions, UpdateOptions};
use crate::result::{MutationResult, QueryResult, SingleResult};

/// Entity-typed CRUD over one table, delegating to a shared provider.
///
/// Plain `find` applies no soft-delete exclusion so deleted-inclusive
/// queries stay possible; use [`find_active`](Self::find_active) to see only
/// rows whose `deleted_at` is null.
///
/// # Example
///
/// ```ignore
/// let repo = Repository::<Account, _>::new(provider.clone());
/// let page = repo.paginate(2, 10, FindOptions::new()).await?;
/// ```
pub struct Repository<T, P> {
    provider: Arc<P>,
    table: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity, P: DataProvider> Repository<T, P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            table: T::table_name(),
            _marker: PhantomData,
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    fn id_filter(id: &str) -> Filter {
        Filter::new().where_eq(T::id_column(), id)
    }

    pub async fn find(&self, options: &FindOptions) -> Result<QueryResult<T>, DataError> {
        self.provider.find(self.table, options).await
    }

    pub async fn find_one(&self, options: &FindOptions) -> Result<SingleResult<T>, DataError> {
        self.provider.find_one(self.table, options).await
    }

    /// Plain lookup by id; soft-deleted rows are returned too.
    pub async fn find_by_id(&self, id: &str) -> Result<SingleResult<T>, DataError> {
        let options = FindOptions::with_filter(Self::id_filter(id));
        self.provider.find_one(self.table, &options).await
    }

    pub async fn count(&self, options: &FindOptions) -> Result<u64, DataError> {
        self.provider.count(self.table, options).await
    }

    pub async fn exists(&self, filter: &Filter) -> Result<bool, DataError> {
        self.provider.exists(self.table, filter).await
    }

    pub async fn create<D>(&self, data: &D, options: &CreateOptions) -> Result<MutationResult<T>, DataError>
    where
        D: Serialize + Sync + ?Sized,
    {
        self.provider.create(self.table, data, options).await
    }

    /// One `create` per item, issued sequentially. Not a bulk statement:
    /// callers needing bulk-insert throughput should use `raw`.
    pub async fn create_many<D>(&self, items: &[D]) -> Result<MutationResult<Vec<T>>, DataError>
    where
        D: Serialize + Sync,
    {
        let options = CreateOptions::default();
        let mut data = Vec::with_capacity(items.len());
        let mut affected = 0;
        for item in items {
            let created = self.provider.create(self.table, item, &options).await?;
            affected += created.affected;
            data.push(created.data);
        }
        debug!(table = self.table, affected, "Created rows one by one");
        Ok(MutationResult { data, affected })
    }

    /// Update one row by id. A missing id yields `data: None, affected: 0`.
    ///
    /// `options.filter` narrows the update further (the id always applies);
    /// `options.returning` selects the returned columns.
    pub async fn update<D>(
        &self,
        id: &str,
        data: &D,
        options: &UpdateOptions,
    ) -> Result<MutationResult<Option<T>>, DataError>
    where
        D: Serialize + Sync + ?Sized,
    {
        let options = UpdateOptions {
            filter: options.filter.clone().merge(&Self::id_filter(id)),
            returning: options.returning.clone(),
        };
        let result = self.provider.update(self.table, data, &options).await?;
        Ok(result.into_single())
    }

    pub async fn update_many<D>(
        &self,
        filter: &Filter,
        data: &D,
    ) -> Result<MutationResult<Vec<T>>, DataError>
    where
        D: Serialize + Sync + ?Sized,
    {
        let options = UpdateOptions::new(filter.clone());
        self.provider.update(self.table, data, &options).await
    }

    pub async fn delete(&self, id: &str, soft: bool) -> Result<MutationResult<Option<T>>, DataError> {
        let mut options = DeleteOptions::new(Self::id_filter(id));
        options.soft = soft;
        let result = self.provider.delete(self.table, &options).await?;
        Ok(result.into_single())
    }

    pub async fn delete_many(&self, filter: &Filter, soft: bool) -> Result<MutationResult<Vec<T>>, DataError> {
        let mut options = DeleteOptions::new(filter.clone());
        options.soft = soft;
        self.provider.delete(self.table, &options).await
    }

    /// Fetch one page. `page` is 1-based; `per_page <= 0` and `page < 1` are
    /// rejected. The row fetch and the count are independent reads and run
    /// concurrently.
    pub async fn paginate(
        &self,
        page: i64,
        per_page: i64,
        options: FindOptions,
    ) -> Result<Page<T>, DataError> {
        let pageable = Pageable::new(page, per_page)?;
        let rows_options = options
            .clone()
            .limit(pageable.per_page)
            .offset(pageable.offset());
        let count_options = FindOptions::with_filter(options.filter);
        debug!(table = self.table, page = pageable.page, per_page = pageable.per_page, "Fetching page");

        let (rows, total) = tokio::try_join!(
            self.provider.find::<T>(self.table, &rows_options),
            self.provider.count(self.table, &count_options),
        )?;
        Ok(Page::new(rows.data, &pageable, total))
    }
}

impl<T: SoftDeletable, P: DataProvider> Repository<T, P> {
    /// `find` restricted to rows whose `deleted_at` is null.
    pub async fn find_active(&self, options: &FindOptions) -> Result<QueryResult<T>, DataError> {
        let mut options = options.clone();
        options.filter = options.filter.where_null(DELETED_AT);
        self.provider.find(self.table, &options).await
    }

    /// `find_one` restricted to rows whose `deleted_at` is null.
    pub async fn find_one_active(&self, options: &FindOptions) -> Result<SingleResult<T>, DataError> {
        let mut options = options.clone();
        options.filter = options.filter.where_null(DELETED_AT);
        self.provider.find_one(self.table, &options).await
    }

    pub async fn find_active_by_id(&self, id: &str) -> Result<SingleResult<T>, DataError> {
        self.find_one_active(&FindOptions::with_filter(Self::id_filter(id)))
            .await
    }

    /// Clear `deleted_at` on a soft-deleted row.
    pub async fn restore(&self, id: &str) -> Result<MutationResult<Option<T>>, DataError> {
        self.update(id, &json!({ "deleted_at": null }), &UpdateOptions::default())
            .await
    }
}

impl<T, P> Clone for Repository<T, P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            table: self.table,
            _marker: PhantomData,
        }
    }
}
