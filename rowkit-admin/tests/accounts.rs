mod common;

use rowkit_admin::NewAccount;

fn new_account(email: &str) -> NewAccount {
    NewAccount {
        email: email.to_string(),
        full_name: Some("Ada Lovelace".to_string()),
    }
}

#[tokio::test]
async fn test_register_normalizes_email() {
    let client = common::client().await;
    let account = client
        .accounts()
        .register(&new_account("Ada@Example.COM"))
        .await
        .unwrap();
    assert_eq!(account.email, "ada@example.com");
    assert_eq!(account.full_name.as_deref(), Some("Ada Lovelace"));
    assert!(!account.is_admin);

    let found = client
        .accounts()
        .find_by_email("ADA@example.com")
        .await
        .unwrap();
    assert_eq!(found.data.unwrap().id, account.id);
}

#[tokio::test]
async fn test_register_rejects_taken_and_invalid_emails() {
    let client = common::client().await;
    client
        .accounts()
        .register(&new_account("ada@example.com"))
        .await
        .unwrap();

    let err = client
        .accounts()
        .register(&new_account("Ada@example.com"))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = client
        .accounts()
        .register(&new_account("not-an-email"))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(client.provider().transport().rows("accounts").await.len(), 1);
}

#[tokio::test]
async fn test_email_availability_honors_exclude_id() {
    let client = common::client().await;
    let accounts = client.accounts();
    let ada = accounts.register(&new_account("ada@example.com")).await.unwrap();

    assert!(!accounts.is_email_available("ada@example.com", None).await);
    assert!(accounts.is_email_available("ada@example.com", Some(&ada.id)).await);
    assert!(!accounts.is_email_available("ada@example.com", Some("someone-else")).await);
    assert!(accounts.is_email_available("grace@example.com", None).await);
}

#[tokio::test]
async fn test_find_by_email_skips_deleted_accounts() {
    let client = common::client().await;
    let accounts = client.accounts();
    let ada = accounts.register(&new_account("ada@example.com")).await.unwrap();
    accounts.delete(&ada.id, true).await.unwrap();

    assert!(!accounts.find_by_email("ada@example.com").await.unwrap().found());
    assert!(accounts.find_by_id(&ada.id).await.unwrap().found());

    accounts.restore(&ada.id).await.unwrap();
    assert!(accounts.find_by_email("ada@example.com").await.unwrap().found());
}

#[tokio::test]
async fn test_admins_listed_by_email() {
    let client = common::client().await;
    let accounts = client.accounts();
    let zed = accounts.register(&new_account("zed@example.com")).await.unwrap();
    let amy = accounts.register(&new_account("amy@example.com")).await.unwrap();
    accounts.register(&new_account("bob@example.com")).await.unwrap();

    let updated = accounts.set_admin(&zed.id, true).await.unwrap();
    assert_eq!(updated.affected, 1);
    assert!(updated.data.unwrap().is_admin);
    accounts.set_admin(&amy.id, true).await.unwrap();

    let emails: Vec<_> = accounts
        .list_admins()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.email)
        .collect();
    assert_eq!(emails, vec!["amy@example.com", "zed@example.com"]);

    accounts.set_admin(&zed.id, false).await.unwrap();
    assert_eq!(accounts.list_admins().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_touch_last_login() {
    let client = common::client().await;
    let accounts = client.accounts();
    let ada = accounts.register(&new_account("ada@example.com")).await.unwrap();
    assert!(ada.last_login_at.is_none());

    let touched = accounts.touch_last_login(&ada.id).await.unwrap();
    assert!(touched.data.unwrap().last_login_at.is_some());

    let missing = accounts.touch_last_login("no-such-id").await.unwrap();
    assert_eq!(missing.affected, 0);
    assert!(missing.data.is_none());
}
