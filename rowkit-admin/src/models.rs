use rowkit_data::{Entity, Id, SoftDeletable, Timestamp};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Role of an account inside an organization, most privileged first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Id,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub last_login_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl Entity for Account {
    fn table_name() -> &'static str {
        "accounts"
    }

    fn id(&self) -> &Id {
        &self.id
    }

    fn created_at(&self) -> &Timestamp {
        &self.created_at
    }

    fn updated_at(&self) -> &Timestamp {
        &self.updated_at
    }
}

impl SoftDeletable for Account {
    fn deleted_at(&self) -> Option<&Timestamp> {
        self.deleted_at.as_ref()
    }
}

#[derive(Debug, Clone, Serialize, Validate)]
pub struct NewAccount {
    #[validate(email(message = "Email must be a valid address"))]
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Id,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub domain: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl Entity for Organization {
    fn table_name() -> &'static str {
        "organizations"
    }

    fn id(&self) -> &Id {
        &self.id
    }

    fn created_at(&self) -> &Timestamp {
        &self.created_at
    }

    fn updated_at(&self) -> &Timestamp {
        &self.updated_at
    }
}

impl SoftDeletable for Organization {
    fn deleted_at(&self) -> Option<&Timestamp> {
        self.deleted_at.as_ref()
    }
}

#[derive(Debug, Clone, Serialize, Validate)]
pub struct NewOrganization {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 63, message = "Slug must be 1-63 characters"))]
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl NewOrganization {
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// Junction row between an organization and an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: Id,
    pub organization_id: Id,
    pub account_id: Id,
    pub role: Role,
    /// Null while the invitation is pending.
    #[serde(default)]
    pub accepted_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Entity for Membership {
    fn table_name() -> &'static str {
        "memberships"
    }

    fn id(&self) -> &Id {
        &self.id
    }

    fn created_at(&self) -> &Timestamp {
        &self.created_at
    }

    fn updated_at(&self) -> &Timestamp {
        &self.updated_at
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewMembership {
    pub organization_id: Id,
    pub account_id: Id,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Id,
    pub organization_id: Id,
    pub name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl Entity for Project {
    fn table_name() -> &'static str {
        "projects"
    }

    fn id(&self) -> &Id {
        &self.id
    }

    fn created_at(&self) -> &Timestamp {
        &self.created_at
    }

    fn updated_at(&self) -> &Timestamp {
        &self.updated_at
    }
}

impl SoftDeletable for Project {
    fn deleted_at(&self) -> Option<&Timestamp> {
        self.deleted_at.as_ref()
    }
}

/// A member of an organization joined with their account details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberWithRole {
    pub account_id: Id,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub role: Role,
    pub joined_at: Timestamp,
}

/// Aggregates for one organization, computed in a single round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationStats {
    pub members_count: u64,
    pub projects_count: u64,
    pub api_keys_count: u64,
    pub storage_bytes: u64,
    pub usage_current_period: u64,
}
