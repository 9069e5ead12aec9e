use chrono::Utc;
use rowkit_data::{
    CreateOptions, DataError, DataProvider, Filter, FindOptions, MutationResult, Repository,
    SingleResult, SortDirection,
};
use serde::Deserialize;
use serde_json::json;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{error, info, warn};
use validator::Validate;

use crate::models::{
    MemberWithRole, Membership, NewMembership, NewOrganization, Organization, OrganizationStats,
    Role,
};

/// Members of an organization with their account, ordered owner, admin,
/// member, then by join time.
pub const MEMBERS_WITH_ROLE_SQL: &str = "select a.id as account_id, a.email, a.full_name, m.role, m.created_at as joined_at \
from memberships m join accounts a on a.id = m.account_id \
where m.organization_id = $1 and a.deleted_at is null \
order by case m.role when 'owner' then 0 when 'admin' then 1 else 2 end, m.created_at";

/// Every organization aggregate in one statement.
pub const ORGANIZATION_STATS_SQL: &str = "select \
(select count(*) from memberships where organization_id = $1 and accepted_at is not null) as members_count, \
(select count(*) from projects where organization_id = $1 and deleted_at is null) as projects_count, \
(select count(*) from api_keys where organization_id = $1 and revoked_at is null) as api_keys_count, \
(select coalesce(sum(size_bytes), 0) from storage_objects where organization_id = $1) as storage_bytes, \
(select coalesce(sum(quantity), 0) from usage_records where organization_id = $1 \
and period_start >= date_trunc('month', now())) as usage_current_period";

#[derive(Deserialize)]
struct IdRow {
    id: String,
}

#[derive(Deserialize)]
struct OrganizationRef {
    organization_id: String,
}

/// Repository for `organizations`, with membership-aware operations.
///
/// Dereferences to the generic [`Repository`] for plain CRUD.
pub struct OrganizationRepository<P> {
    organizations: Repository<Organization, P>,
    memberships: Repository<Membership, P>,
}

impl<P: DataProvider> OrganizationRepository<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            organizations: Repository::new(provider.clone()),
            memberships: Repository::new(provider),
        }
    }

    /// Active organization with the given slug.
    pub async fn find_by_slug(&self, slug: &str) -> Result<SingleResult<Organization>, DataError> {
        self.organizations
            .find_one_active(&FindOptions::new().where_eq("slug", slug))
            .await
    }

    /// `true` when no organization other than `exclude_id` uses `slug`.
    /// Lookup failures count as unavailable.
    pub async fn is_slug_available(&self, slug: &str, exclude_id: Option<&str>) -> bool {
        self.is_available("slug", slug, exclude_id).await
    }

    pub async fn is_domain_available(&self, domain: &str, exclude_id: Option<&str>) -> bool {
        self.is_available("domain", domain, exclude_id).await
    }

    async fn is_available(&self, column: &str, value: &str, exclude_id: Option<&str>) -> bool {
        let options = FindOptions::new().select(["id"]).where_eq(column, value).limit(2);
        let provider = self.organizations.provider();
        match provider
            .find::<IdRow>(self.organizations.table(), &options)
            .await
        {
            Ok(rows) => rows.data.iter().all(|row| Some(row.id.as_str()) == exclude_id),
            Err(e) => {
                warn!(column, value, error = %e, "Availability check failed; reporting unavailable");
                false
            }
        }
    }

    pub async fn get_members_with_role(&self, organization_id: &str) -> Result<Vec<MemberWithRole>, DataError> {
        let result = self
            .organizations
            .provider()
            .raw(MEMBERS_WITH_ROLE_SQL, &[json!(organization_id)])
            .await?;
        Ok(result.data)
    }

    pub async fn get_stats(&self, organization_id: &str) -> Result<OrganizationStats, DataError> {
        let result = self
            .organizations
            .provider()
            .raw::<OrganizationStats>(ORGANIZATION_STATS_SQL, &[json!(organization_id)])
            .await?;
        Ok(result.into_first().unwrap_or_default())
    }

    /// Create an organization and its owner membership.
    ///
    /// The two inserts are independent requests, not a transaction. When the
    /// membership insert fails the organization row is hard-deleted again and
    /// the membership error is returned.
    pub async fn create_with_owner(
        &self,
        new_org: &NewOrganization,
        owner_id: &str,
    ) -> Result<(Organization, Membership), DataError> {
        new_org
            .validate()
            .map_err(|e| DataError::validation(e.to_string()))?;
        if !self.is_slug_available(&new_org.slug, None).await {
            return Err(DataError::validation(format!(
                "slug '{}' is already taken",
                new_org.slug
            )));
        }

        let organization = self
            .organizations
            .create(new_org, &CreateOptions::default())
            .await?
            .data;

        let owner = NewMembership {
            organization_id: organization.id.clone(),
            account_id: owner_id.to_string(),
            role: Role::Owner,
            accepted_at: Some(Utc::now()),
        };
        match self.memberships.create(&owner, &CreateOptions::default()).await {
            Ok(membership) => {
                info!(organization_id = %organization.id, slug = %organization.slug, "Organization created");
                Ok((organization, membership.data))
            }
            Err(e) => {
                warn!(organization_id = %organization.id, error = %e, "Owner membership failed; deleting organization");
                if let Err(cleanup) = self.organizations.delete(&organization.id, false).await {
                    error!(organization_id = %organization.id, error = %cleanup, "Compensating delete failed");
                }
                Err(e)
            }
        }
    }

    /// Active organizations the account belongs to, ordered by name.
    pub async fn find_for_account(&self, account_id: &str) -> Result<Vec<Organization>, DataError> {
        let options = FindOptions::new()
            .select(["organization_id"])
            .where_eq("account_id", account_id);
        let refs = self
            .memberships
            .provider()
            .find::<OrganizationRef>(self.memberships.table(), &options)
            .await?;
        if refs.data.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = refs.data.into_iter().map(|r| r.organization_id).collect();
        let options = FindOptions::new()
            .where_in("id", ids)
            .order_by("name", SortDirection::Asc);
        Ok(self.organizations.find_active(&options).await?.data)
    }

    pub async fn add_member(&self, organization_id: &str, account_id: &str, role: Role) -> Result<Membership, DataError> {
        let membership = NewMembership {
            organization_id: organization_id.to_string(),
            account_id: account_id.to_string(),
            role,
            accepted_at: Some(Utc::now()),
        };
        Ok(self
            .memberships
            .create(&membership, &CreateOptions::default())
            .await?
            .data)
    }

    /// Remove the account's membership; returns the number of rows removed.
    pub async fn remove_member(&self, organization_id: &str, account_id: &str) -> Result<u64, DataError> {
        let filter = Filter::new()
            .where_eq("organization_id", organization_id)
            .where_eq("account_id", account_id);
        let removed: MutationResult<Vec<Membership>> = self.memberships.delete_many(&filter, false).await?;
        Ok(removed.affected)
    }

    pub fn memberships(&self) -> &Repository<Membership, P> {
        &self.memberships
    }
}

impl<P> Deref for OrganizationRepository<P> {
    type Target = Repository<Organization, P>;

    fn deref(&self) -> &Self::Target {
        &self.organizations
    }
}

impl<P> Clone for OrganizationRepository<P> {
    fn clone(&self) -> Self {
        Self {
            organizations: self.organizations.clone(),
            memberships: self.memberships.clone(),
        }
    }
}
