//! # rowkit-admin — accounts, organizations and the data client
//!
//! Domain layer on top of `rowkit-data`: entity types for accounts,
//! organizations, memberships and projects, repositories with the queries
//! the admin surface needs, and [`DataClient`], which wires one provider to
//! all of them.

pub mod account_repository;
pub mod client;
pub mod models;
pub mod organization_repository;
pub mod telemetry;

pub use account_repository::AccountRepository;
pub use client::DataClient;
pub use models::{
    Account, MemberWithRole, Membership, NewAccount, NewMembership, NewOrganization,
    Organization, OrganizationStats, Project, Role,
};
pub use organization_repository::{
    OrganizationRepository, MEMBERS_WITH_ROLE_SQL, ORGANIZATION_STATS_SQL,
};
pub use telemetry::init_tracing;

pub mod prelude {
    //! Re-exports of the most commonly used types.
    pub use crate::{
        Account, AccountRepository, DataClient, NewAccount, NewOrganization, Organization,
        OrganizationRepository, Role,
    };
    pub use rowkit_data::prelude::*;
}
