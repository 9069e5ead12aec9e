use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Opaque record identifier (a UUID string for most backends).
pub type Id = String;

/// Timestamp type used for `created_at` / `updated_at` / `deleted_at`.
pub type Timestamp = DateTime<Utc>;

/// Name of the column holding the soft-delete timestamp.
pub const DELETED_AT: &str = "deleted_at";

/// Name of the primary key column.
pub const ID: &str = "id";

/// Trait representing a stored record bound to one table.
///
/// Every record carries an `id`, `created_at` and `updated_at`. The two
/// timestamps are assigned by the backend; callers never set them.
///
/// # Example
///
/// ```ignore
/// impl Entity for Account {
///     fn table_name() -> &'static str { "accounts" }
///     fn id(&self) -> &Id { &self.id }
///     fn created_at(&self) -> &Timestamp { &self.created_at }
///     fn updated_at(&self) -> &Timestamp { &self.updated_at }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    fn table_name() -> &'static str;

    fn id_column() -> &'static str {
        ID
    }

    fn id(&self) -> &Id;
    fn created_at(&self) -> &Timestamp;
    fn updated_at(&self) -> &Timestamp;
}

/// An entity whose deletion is logical: a non-null `deleted_at` marks the
/// row as deleted while keeping it queryable through explicit queries.
pub trait SoftDeletable: Entity {
    fn deleted_at(&self) -> Option<&Timestamp>;

    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }
}
