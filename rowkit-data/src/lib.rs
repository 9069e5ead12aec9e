pub mod entity;
pub mod error;
pub mod page;
pub mod provider;
pub mod query;
pub mod realtime;
pub mod repository;
pub mod result;

pub use entity::{Entity, Id, SoftDeletable, Timestamp};
pub use error::{DataError, DataResult, ErrorKind};
pub use page::{Page, Pageable};
pub use provider::DataProvider;
pub use query::{
    CreateOptions, DeleteOptions, FieldValue, Filter, FindOptions, OrderBy, QueryDescriptor,
    SortDirection, UpdateOptions,
};
pub use realtime::{
    ChangeEvent, ChangeHandler, ChangeType, EventFilter, RealtimeProvider, SubscribeOptions,
    Subscription,
};
pub use repository::Repository;
pub use result::{MutationResult, QueryResult, SingleResult};

pub mod prelude {
    //! Re-exports of the most commonly used data types.
    pub use crate::{
        DataError, DataProvider, Entity, Filter, FindOptions, Page, RealtimeProvider, Repository,
        SoftDeletable, SortDirection,
    };
}
