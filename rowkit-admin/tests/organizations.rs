mod common;

use rowkit_admin::{NewAccount, NewMembership, NewOrganization, Project, Role};
use rowkit_data::{CreateOptions, DataProvider, FindOptions};
use serde_json::json;

async fn account(client: &common::Client, email: &str) -> String {
    client
        .accounts()
        .register(&NewAccount {
            email: email.to_string(),
            full_name: None,
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_create_with_owner_takes_the_slug() {
    let client = common::client().await;
    let owner = account(&client, "u1@example.com").await;
    let orgs = client.organizations();

    assert!(orgs.is_slug_available("acme", None).await);
    let (org, membership) = orgs
        .create_with_owner(&NewOrganization::new("Acme", "acme"), &owner)
        .await
        .unwrap();
    assert_eq!(membership.role, Role::Owner);
    assert_eq!(membership.organization_id, org.id);
    assert_eq!(membership.account_id, owner);

    assert!(!orgs.is_slug_available("acme", None).await);
    assert!(orgs.is_slug_available("acme", Some(&org.id)).await);
    assert_eq!(orgs.find_by_slug("acme").await.unwrap().data.unwrap().id, org.id);

    let err = orgs
        .create_with_owner(&NewOrganization::new("Acme Two", "acme"), &owner)
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_failed_membership_removes_the_organization() {
    let client = common::client().await;
    let owner = account(&client, "u1@example.com").await;
    client.provider().transport().fail_writes_to("memberships");

    let err = client
        .organizations()
        .create_with_owner(&NewOrganization::new("Acme", "acme"), &owner)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), rowkit_data::ErrorKind::Backend);

    assert!(client.provider().transport().rows("organizations").await.is_empty());
    assert!(client.organizations().is_slug_available("acme", None).await);
}

#[tokio::test]
async fn test_invalid_organization_is_rejected_before_writing() {
    let client = common::client().await;
    client.provider().transport().clear_requests();
    let err = client
        .organizations()
        .create_with_owner(&NewOrganization::new("", "acme"), "u1")
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(client.provider().transport().requests().is_empty());
}

#[tokio::test]
async fn test_find_by_slug_ignores_deleted_organizations() {
    let client = common::client().await;
    let owner = account(&client, "u1@example.com").await;
    let (org, _) = client
        .organizations()
        .create_with_owner(&NewOrganization::new("Acme", "acme"), &owner)
        .await
        .unwrap();
    client.organizations().delete(&org.id, true).await.unwrap();

    assert!(!client.organizations().find_by_slug("acme").await.unwrap().found());
    // the slug stays reserved by the soft-deleted row
    assert!(!client.organizations().is_slug_available("acme", None).await);
}

#[tokio::test]
async fn test_domain_availability() {
    let client = common::client().await;
    let owner = account(&client, "u1@example.com").await;
    let (org, _) = client
        .organizations()
        .create_with_owner(
            &NewOrganization::new("Acme", "acme").with_domain("acme.io"),
            &owner,
        )
        .await
        .unwrap();
    let orgs = client.organizations();
    assert!(!orgs.is_domain_available("acme.io", None).await);
    assert!(orgs.is_domain_available("acme.io", Some(&org.id)).await);
    assert!(orgs.is_domain_available("other.io", None).await);
}

#[tokio::test]
async fn test_stats_in_one_call() {
    let client = common::client().await;
    let owner = account(&client, "owner@example.com").await;
    let a = account(&client, "a@example.com").await;
    let b = account(&client, "b@example.com").await;
    let orgs = client.organizations();
    let (org, _) = orgs
        .create_with_owner(&NewOrganization::new("Acme", "acme"), &owner)
        .await
        .unwrap();
    orgs.add_member(&org.id, &a, Role::Admin).await.unwrap();
    orgs.add_member(&org.id, &b, Role::Member).await.unwrap();
    let invited = account(&client, "invited@example.com").await;
    let pending = NewMembership {
        organization_id: org.id.clone(),
        account_id: invited,
        role: Role::Member,
        accepted_at: None,
    };
    orgs.memberships()
        .create(&pending, &CreateOptions::default())
        .await
        .unwrap();

    let projects = client.repository::<Project>();
    for name in ["api", "web", "legacy"] {
        projects
            .create(&json!({"organization_id": org.id, "name": name}), &CreateOptions::default())
            .await
            .unwrap();
    }
    let legacy = projects
        .find_one(&FindOptions::new().where_eq("name", "legacy"))
        .await
        .unwrap()
        .data
        .unwrap();
    projects.delete(&legacy.id, true).await.unwrap();

    client.provider().transport().clear_requests();
    let stats = orgs.get_stats(&org.id).await.unwrap();
    assert_eq!(stats.members_count, 3);
    assert_eq!(stats.projects_count, 2);
    assert_eq!(client.provider().transport().requests().len(), 1);
}

#[tokio::test]
async fn test_members_ordered_by_role_then_join_time() {
    let client = common::client().await;
    let owner = account(&client, "owner@example.com").await;
    let m1 = account(&client, "m1@example.com").await;
    let admin = account(&client, "admin@example.com").await;
    let m2 = account(&client, "m2@example.com").await;
    let orgs = client.organizations();
    let (org, _) = orgs
        .create_with_owner(&NewOrganization::new("Acme", "acme"), &owner)
        .await
        .unwrap();
    orgs.add_member(&org.id, &m1, Role::Member).await.unwrap();
    orgs.add_member(&org.id, &admin, Role::Admin).await.unwrap();
    orgs.add_member(&org.id, &m2, Role::Member).await.unwrap();

    let members = orgs.get_members_with_role(&org.id).await.unwrap();
    let emails: Vec<_> = members.iter().map(|m| m.email.as_str()).collect();
    assert_eq!(
        emails,
        vec![
            "owner@example.com",
            "admin@example.com",
            "m1@example.com",
            "m2@example.com"
        ]
    );
    assert_eq!(members[0].role, Role::Owner);
}

#[tokio::test]
async fn test_find_for_account_and_remove_member() {
    let client = common::client().await;
    let owner = account(&client, "owner@example.com").await;
    let member = account(&client, "m@example.com").await;
    let orgs = client.organizations();
    let (zeta, _) = orgs
        .create_with_owner(&NewOrganization::new("Zeta", "zeta"), &owner)
        .await
        .unwrap();
    let (alpha, _) = orgs
        .create_with_owner(&NewOrganization::new("Alpha", "alpha"), &owner)
        .await
        .unwrap();
    orgs.add_member(&zeta.id, &member, Role::Member).await.unwrap();

    let names: Vec<_> = orgs
        .find_for_account(&owner)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.name)
        .collect();
    assert_eq!(names, vec!["Alpha", "Zeta"]);

    assert_eq!(orgs.find_for_account(&member).await.unwrap().len(), 1);
    assert_eq!(orgs.remove_member(&zeta.id, &member).await.unwrap(), 1);
    assert!(orgs.find_for_account(&member).await.unwrap().is_empty());
    assert_eq!(orgs.remove_member(&zeta.id, &member).await.unwrap(), 0);

    orgs.delete(&alpha.id, true).await.unwrap();
    assert_eq!(orgs.find_for_account(&owner).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_raw_statement_is_a_backend_error() {
    let client = common::client().await;
    let err = client
        .provider()
        .raw::<serde_json::Value>("select nonsense(", &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), rowkit_data::ErrorKind::Backend);
}
