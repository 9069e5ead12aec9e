use chrono::Utc;
use rowkit_data::{
    CreateOptions, DataError, DataProvider, FindOptions, MutationResult, Repository, SingleResult,
    SortDirection, UpdateOptions,
};
use serde::Deserialize;
use serde_json::json;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use crate::models::{Account, NewAccount};

#[derive(Deserialize)]
struct IdRow {
    id: String,
}

/// Emails are stored and compared lowercased.
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct AccountRepository<P> {
    accounts: Repository<Account, P>,
}

impl<P: DataProvider> AccountRepository<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            accounts: Repository::new(provider),
        }
    }

    /// Validate, check the email is free, then create the account.
    pub async fn register(&self, new_account: &NewAccount) -> Result<Account, DataError> {
        new_account
            .validate()
            .map_err(|e| DataError::validation(e.to_string()))?;
        let mut new_account = new_account.clone();
        new_account.email = normalize_email(&new_account.email);
        if !self.is_email_available(&new_account.email, None).await {
            return Err(DataError::validation(format!(
                "email '{}' is already registered",
                new_account.email
            )));
        }
        let account = self
            .accounts
            .create(&new_account, &CreateOptions::default())
            .await?
            .data;
        info!(account_id = %account.id, "Account registered");
        Ok(account)
    }

    /// Active account with the given email.
    pub async fn find_by_email(&self, email: &str) -> Result<SingleResult<Account>, DataError> {
        self.accounts
            .find_one_active(&FindOptions::new().where_eq("email", normalize_email(email)))
            .await
    }

    /// `true` when no account other than `exclude_id` uses `email`.
    /// Lookup failures count as unavailable.
    pub async fn is_email_available(&self, email: &str, exclude_id: Option<&str>) -> bool {
        let options = FindOptions::new()
            .select(["id"])
            .where_eq("email", normalize_email(email))
            .limit(2);
        match self
            .accounts
            .provider()
            .find::<IdRow>(self.accounts.table(), &options)
            .await
        {
            Ok(rows) => rows.data.iter().all(|row| Some(row.id.as_str()) == exclude_id),
            Err(e) => {
                warn!(error = %e, "Email availability check failed; reporting unavailable");
                false
            }
        }
    }

    pub async fn set_admin(&self, id: &str, is_admin: bool) -> Result<MutationResult<Option<Account>>, DataError> {
        self.accounts
            .update(id, &json!({ "is_admin": is_admin }), &UpdateOptions::default())
            .await
    }

    /// Active administrators ordered by email.
    pub async fn list_admins(&self) -> Result<Vec<Account>, DataError> {
        let options = FindOptions::new()
            .where_eq("is_admin", true)
            .order_by("email", SortDirection::Asc);
        Ok(self.accounts.find_active(&options).await?.data)
    }

    pub async fn touch_last_login(&self, id: &str) -> Result<MutationResult<Option<Account>>, DataError> {
        self.accounts
            .update(
                id,
                &json!({ "last_login_at": Utc::now() }),
                &UpdateOptions::default(),
            )
            .await
    }
}

impl<P> Deref for AccountRepository<P> {
    type Target = Repository<Account, P>;

    fn deref(&self) -> &Self::Target {
        &self.accounts
    }
}

impl<P> Clone for AccountRepository<P> {
    fn clone(&self) -> Self {
        Self {
            accounts: self.accounts.clone(),
        }
    }
}
