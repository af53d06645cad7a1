//! Integration tests for the metadata service over the in-memory store.

mod common;

use std::sync::Arc;

use common::{TestContext, edit_document, intercepted, user};
use repometa::error::Error;
use repometa::metadata::{INTERNAL_REPO, METADATA_REPO, MetadataService, membership};
use repometa::store::{DocumentStore, SqliteStore};
use repometa::types::{
    Identity, ProjectMetadata, ProjectRole, ProjectRoles, QuotaConfig, RepositoryRole, Revision,
    Tokens, User, UserAndTimestamp,
};
use tempfile::TempDir;
use tokio::task::JoinSet;

#[tokio::test]
async fn test_project_lifecycle() {
    let ctx = TestContext::new();
    ctx.project("foo").await;

    let metadata = ctx.service.get_project("foo").await.unwrap();
    assert_eq!(metadata.name, "foo");
    assert!(metadata.repo(METADATA_REPO).is_some());
    assert_eq!(
        metadata.member(ctx.author.id()).map(|m| m.role),
        Some(ProjectRole::Owner)
    );

    assert!(matches!(
        ctx.service.create_project(&ctx.author, "foo").await,
        Err(Error::ProjectExists(_))
    ));
    assert!(matches!(
        ctx.service.restore_project(&ctx.author, "foo").await,
        Err(Error::ProjectNotFound(_))
    ));
    assert!(matches!(
        ctx.service.purge_project(&ctx.author, "foo").await,
        Err(Error::ProjectNotFound(_))
    ));

    ctx.service
        .add_repo_with_defaults(&ctx.author, "foo", "apple")
        .await
        .unwrap();
    let before = ctx.service.get_project("foo").await.unwrap();

    ctx.service.remove_project(&ctx.author, "foo").await.unwrap();
    assert!(ctx.service.get_project("foo").await.unwrap().is_removed());
    assert!(matches!(
        ctx.service.remove_project(&ctx.author, "foo").await,
        Err(Error::Conflict(_))
    ));

    ctx.service.restore_project(&ctx.author, "foo").await.unwrap();
    let restored = ctx.service.get_project("foo").await.unwrap();
    assert_eq!(restored, before);
    assert!(!restored.is_removed());

    ctx.service.remove_project(&ctx.author, "foo").await.unwrap();
    ctx.service.purge_project(&ctx.author, "foo").await.unwrap();
    assert!(matches!(
        ctx.service.get_project("foo").await,
        Err(Error::ProjectNotFound(_))
    ));
    assert!(ctx.service.list_projects().await.unwrap().is_empty());

    // The name is free again.
    ctx.project("foo").await;
}

#[tokio::test]
async fn test_project_name_validation() {
    let ctx = TestContext::new();
    for name in ["", "-foo", "_foo", ".foo", "foo bar"] {
        assert!(
            matches!(
                ctx.service.create_project(&ctx.author, name).await,
                Err(Error::BadRequest(_))
            ),
            "accepted {name:?}"
        );
    }
}

#[tokio::test]
async fn test_repository_lifecycle() {
    let ctx = TestContext::new();
    ctx.project("foo").await;

    let rev = ctx
        .service
        .add_repo_with_defaults(&ctx.author, "foo", "apple")
        .await
        .unwrap();
    let repo = ctx.service.get_repo("foo", "apple").await.unwrap();
    assert_eq!(repo.roles.projects.member, Some(RepositoryRole::Write));
    assert_eq!(repo.roles.projects.guest, None);

    assert!(matches!(
        ctx.service.add_repo_with_defaults(&ctx.author, "foo", "apple").await,
        Err(Error::RepositoryExists { .. })
    ));
    assert!(matches!(
        ctx.service.restore_repo(&ctx.author, "foo", "apple").await,
        Err(Error::RepositoryNotFound { .. })
    ));
    assert!(matches!(
        ctx.service.purge_repo(&ctx.author, "foo", "apple").await,
        Err(Error::RepositoryNotFound { .. })
    ));

    let removed = ctx.service.remove_repo(&ctx.author, "foo", "apple").await.unwrap();
    assert!(removed > rev);
    assert!(ctx.service.get_repo("foo", "apple").await.unwrap().is_removed());

    ctx.service.restore_repo(&ctx.author, "foo", "apple").await.unwrap();
    assert!(!ctx.service.get_repo("foo", "apple").await.unwrap().is_removed());

    ctx.service.remove_repo(&ctx.author, "foo", "apple").await.unwrap();
    ctx.service.purge_repo(&ctx.author, "foo", "apple").await.unwrap();
    assert!(matches!(
        ctx.service.get_repo("foo", "apple").await,
        Err(Error::RepositoryNotFound { .. })
    ));

    // The name may be used again and yields a fresh repository.
    let original = repo;
    let other = user("other@localhost.com");
    ctx.service
        .add_repo(&other, "foo", "apple", ProjectRoles::none())
        .await
        .unwrap();
    let recreated = ctx.service.get_repo("foo", "apple").await.unwrap();
    assert!(!recreated.is_removed());
    assert_eq!(recreated.creation.user, other.id());
    assert_ne!(recreated.creation, original.creation);
    assert!(recreated.creation.timestamp >= original.creation.timestamp);
    assert_eq!(recreated.roles.projects, ProjectRoles::none());
}

#[tokio::test]
async fn test_reserved_repositories() {
    let ctx = TestContext::new();
    ctx.project("foo").await;

    for repo in [INTERNAL_REPO, METADATA_REPO] {
        assert!(matches!(
            ctx.service.add_repo_with_defaults(&ctx.author, "foo", repo).await,
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            ctx.service.remove_repo(&ctx.author, "foo", repo).await,
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            ctx.service.purge_repo(&ctx.author, "foo", repo).await,
            Err(Error::Unsupported(_))
        ));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_repository_metadata_is_backfilled() {
    let ctx = TestContext::new();
    ctx.project("foo").await;
    ctx.physical_repo("foo", INTERNAL_REPO);
    ctx.physical_repo("foo", "apple");
    ctx.physical_repo("foo", "banana");

    let service = Arc::new(ctx.service);
    let mut tasks = JoinSet::new();
    for _ in 0..10 {
        let service = service.clone();
        tasks.spawn(async move { service.get_project("foo").await });
    }
    while let Some(result) = tasks.join_next().await {
        let metadata = result.unwrap().unwrap();
        assert!(metadata.repo("apple").is_some());
        assert!(metadata.repo("banana").is_some());
    }

    let metadata = service.get_project("foo").await.unwrap();
    assert!(metadata.repo(INTERNAL_REPO).is_none());
    let apple = metadata.repo("apple").unwrap();
    assert_eq!(apple.roles.projects, ProjectRoles::of(Some(RepositoryRole::Write), None));
    assert_eq!(apple.creation.user, ctx.author.id());
}

#[tokio::test]
async fn test_repository_project_roles() {
    let ctx = TestContext::new();
    ctx.project("foo").await;
    ctx.service
        .add_repo_with_defaults(&ctx.author, "foo", "apple")
        .await
        .unwrap();

    let roles = ProjectRoles::of(Some(RepositoryRole::Read), Some(RepositoryRole::Read));
    let rev = ctx
        .service
        .update_repository_project_roles(&ctx.author, "foo", "apple", roles)
        .await
        .unwrap();
    assert_eq!(ctx.service.get_repo("foo", "apple").await.unwrap().roles.projects, roles);

    // Same roles again is a no-op.
    let again = ctx
        .service
        .update_repository_project_roles(&ctx.author, "foo", "apple", roles)
        .await
        .unwrap();
    assert_eq!(again, rev);

    let unsupported = |result: repometa::error::Result<Revision>| match result {
        Err(Error::Unsupported(message)) => message,
        other => panic!("expected Unsupported, got {other:?}"),
    };
    assert_eq!(
        unsupported(
            ctx.service
                .update_repository_project_roles(&ctx.author, "foo", INTERNAL_REPO, ProjectRoles::none())
                .await
        ),
        "Can't update role for internal repository: dogma"
    );
    assert_eq!(
        unsupported(
            ctx.service
                .update_repository_project_roles(
                    &ctx.author,
                    "foo",
                    METADATA_REPO,
                    ProjectRoles::of(Some(RepositoryRole::Write), None)
                )
                .await
        ),
        "Can't give a write role to members for internal repository: meta"
    );
    assert_eq!(
        unsupported(
            ctx.service
                .update_repository_project_roles(
                    &ctx.author,
                    "foo",
                    METADATA_REPO,
                    ProjectRoles::of(None, Some(RepositoryRole::Read))
                )
                .await
        ),
        "Can't give a role to guest for internal repository: meta"
    );
    ctx.service
        .update_repository_project_roles(
            &ctx.author,
            "foo",
            METADATA_REPO,
            ProjectRoles::of(Some(RepositoryRole::Read), None),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_user_repository_role() {
    let ctx = TestContext::new();
    ctx.project("foo").await;
    ctx.service
        .add_repo(&ctx.author, "foo", "apple", ProjectRoles::none())
        .await
        .unwrap();
    let member = user("user1@localhost.com");
    let identity = Identity::from(&member);

    assert!(matches!(
        ctx.service
            .add_user_repository_role(&ctx.author, "foo", "apple", &member, RepositoryRole::Read)
            .await,
        Err(Error::MemberNotFound { .. })
    ));

    ctx.service
        .add_member(&ctx.author, "foo", &member, ProjectRole::Member)
        .await
        .unwrap();
    assert!(matches!(
        ctx.service
            .add_member(&ctx.author, "foo", &member, ProjectRole::Member)
            .await,
        Err(Error::Conflict(_))
    ));
    assert_eq!(
        ctx.service.find_repository_role("foo", "apple", &identity).await.unwrap(),
        None
    );

    let added = ctx
        .service
        .add_user_repository_role(&ctx.author, "foo", "apple", &member, RepositoryRole::Read)
        .await
        .unwrap();
    assert_eq!(
        ctx.service.find_repository_role("foo", "apple", &identity).await.unwrap(),
        Some(RepositoryRole::Read)
    );
    assert!(matches!(
        ctx.service
            .add_user_repository_role(&ctx.author, "foo", "apple", &member, RepositoryRole::Write)
            .await,
        Err(Error::Conflict(_))
    ));

    let same = ctx
        .service
        .update_user_repository_role(&ctx.author, "foo", "apple", &member, RepositoryRole::Read)
        .await
        .unwrap();
    assert_eq!(same, added);

    let updated = ctx
        .service
        .update_user_repository_role(&ctx.author, "foo", "apple", &member, RepositoryRole::Write)
        .await
        .unwrap();
    assert_eq!(updated, added.forward(1));
    assert_eq!(
        ctx.service.find_repository_role("foo", "apple", &identity).await.unwrap(),
        Some(RepositoryRole::Write)
    );
    let again = ctx
        .service
        .update_user_repository_role(&ctx.author, "foo", "apple", &member, RepositoryRole::Write)
        .await
        .unwrap();
    assert_eq!(again, updated);

    let removed = ctx
        .service
        .remove_user_repository_role(&ctx.author, "foo", "apple", &member)
        .await
        .unwrap();
    assert_eq!(removed, updated.forward(1));
    assert!(matches!(
        ctx.service
            .remove_user_repository_role(&ctx.author, "foo", "apple", &member)
            .await,
        Err(Error::MemberNotFound { .. })
    ));
    assert!(matches!(
        ctx.service
            .update_user_repository_role(&ctx.author, "foo", "apple", &member, RepositoryRole::Read)
            .await,
        Err(Error::MemberNotFound { .. })
    ));
}

#[tokio::test]
async fn test_token_repository_role() {
    let ctx = TestContext::new();
    ctx.project("foo").await;
    ctx.service
        .add_repo(&ctx.author, "foo", "apple", ProjectRoles::none())
        .await
        .unwrap();

    assert!(matches!(
        ctx.service
            .add_token(&ctx.author, "foo", "app-1", ProjectRole::Member)
            .await,
        Err(Error::TokenNotFound(_))
    ));

    ctx.service.create_token(&ctx.author, "app-1", false).await.unwrap();
    assert!(matches!(
        ctx.service.create_token(&ctx.author, "app-1", false).await,
        Err(Error::Conflict(_))
    ));
    ctx.service
        .add_token(&ctx.author, "foo", "app-1", ProjectRole::Member)
        .await
        .unwrap();

    let identity = Identity::Token("app-1".to_string());
    let added = ctx
        .service
        .add_token_repository_role(&ctx.author, "foo", "apple", "app-1", RepositoryRole::Read)
        .await
        .unwrap();
    assert_eq!(
        ctx.service.find_repository_role("foo", "apple", &identity).await.unwrap(),
        Some(RepositoryRole::Read)
    );

    let updated = ctx
        .service
        .update_token_repository_role(&ctx.author, "foo", "apple", "app-1", RepositoryRole::Write)
        .await
        .unwrap();
    assert_eq!(updated, added.forward(1));
    assert_eq!(
        ctx.service.find_repository_role("foo", "apple", &identity).await.unwrap(),
        Some(RepositoryRole::Write)
    );
    let again = ctx
        .service
        .update_token_repository_role(&ctx.author, "foo", "apple", "app-1", RepositoryRole::Write)
        .await
        .unwrap();
    assert_eq!(again, updated);

    ctx.service
        .remove_token_repository_role(&ctx.author, "foo", "apple", "app-1")
        .await
        .unwrap();
    assert!(matches!(
        ctx.service
            .remove_token_repository_role(&ctx.author, "foo", "apple", "app-1")
            .await,
        Err(Error::TokenNotFound(_))
    ));
}

#[tokio::test]
async fn test_remove_member_drops_grants() {
    let ctx = TestContext::new();
    ctx.project("foo").await;
    let member = user("user1@localhost.com");
    ctx.service
        .add_member(&ctx.author, "foo", &member, ProjectRole::Member)
        .await
        .unwrap();
    for repo in ["apple", "banana"] {
        ctx.service
            .add_repo_with_defaults(&ctx.author, "foo", repo)
            .await
            .unwrap();
        ctx.service
            .add_user_repository_role(&ctx.author, "foo", repo, &member, RepositoryRole::Read)
            .await
            .unwrap();
    }

    ctx.service.remove_member(&ctx.author, "foo", &member).await.unwrap();

    let metadata = ctx.service.get_project("foo").await.unwrap();
    assert!(metadata.member(member.id()).is_none());
    for repo in metadata.repos.values() {
        assert!(!repo.roles.users.contains_key(member.id()));
    }
    assert!(matches!(
        ctx.service.get_member("foo", &member).await,
        Err(Error::MemberNotFound { .. })
    ));
    assert!(matches!(
        ctx.service.remove_member(&ctx.author, "foo", &member).await,
        Err(Error::MemberNotFound { .. })
    ));
}

#[tokio::test]
async fn test_remove_token_drops_grants() {
    let ctx = TestContext::new();
    ctx.project("foo").await;
    ctx.service
        .add_repo_with_defaults(&ctx.author, "foo", "apple")
        .await
        .unwrap();
    ctx.service.create_token(&ctx.author, "app-1", false).await.unwrap();
    ctx.service
        .add_token(&ctx.author, "foo", "app-1", ProjectRole::Member)
        .await
        .unwrap();
    ctx.service
        .add_token_repository_role(&ctx.author, "foo", "apple", "app-1", RepositoryRole::Write)
        .await
        .unwrap();

    ctx.service.remove_token(&ctx.author, "foo", "app-1").await.unwrap();

    let metadata = ctx.service.get_project("foo").await.unwrap();
    assert!(metadata.token("app-1").is_none());
    assert!(metadata.repo("apple").unwrap().roles.tokens.is_empty());
    assert!(matches!(
        ctx.service.remove_token(&ctx.author, "foo", "app-1").await,
        Err(Error::TokenNotFound(_))
    ));
    // The global token is untouched.
    assert!(ctx.service.find_token_by_app_id("app-1").await.is_ok());
}

#[tokio::test]
async fn test_destroy_token_removes_it_from_every_project() {
    let ctx = TestContext::new();
    ctx.service.create_token(&ctx.author, "app-1", false).await.unwrap();
    for project in ["foo", "bar"] {
        ctx.project(project).await;
        ctx.service
            .add_repo_with_defaults(&ctx.author, project, "apple")
            .await
            .unwrap();
        ctx.service
            .add_token(&ctx.author, project, "app-1", ProjectRole::Member)
            .await
            .unwrap();
        ctx.service
            .add_token_repository_role(&ctx.author, project, "apple", "app-1", RepositoryRole::Read)
            .await
            .unwrap();
    }

    ctx.service.destroy_token(&ctx.author, "app-1").await.unwrap();

    for project in ["foo", "bar"] {
        let metadata = ctx.service.get_project(project).await.unwrap();
        assert!(metadata.token("app-1").is_none());
        assert!(metadata.repo("apple").unwrap().roles.tokens.is_empty());
    }
    assert!(ctx.service.find_token_by_app_id("app-1").await.unwrap().is_deleted());
    assert!(matches!(
        ctx.service.destroy_token(&ctx.author, "app-1").await,
        Err(Error::TokenNotFound(_))
    ));
    assert!(matches!(
        ctx.service
            .add_token(&ctx.author, "foo", "app-1", ProjectRole::Member)
            .await,
        Err(Error::TokenNotFound(_))
    ));

    ctx.service.purge_token(&ctx.author, "app-1").await.unwrap();
    assert!(matches!(
        ctx.service.find_token_by_app_id("app-1").await,
        Err(Error::TokenNotFound(_))
    ));
    // The app id may be used again.
    ctx.service.create_token(&ctx.author, "app-1", false).await.unwrap();
}

#[tokio::test]
async fn test_purge_requires_destroy() {
    let ctx = TestContext::new();
    ctx.service.create_token(&ctx.author, "app-1", false).await.unwrap();
    assert!(matches!(
        ctx.service.purge_token(&ctx.author, "app-1").await,
        Err(Error::Conflict(_))
    ));
    assert!(matches!(
        ctx.service.purge_token(&ctx.author, "app-2").await,
        Err(Error::TokenNotFound(_))
    ));
}

#[tokio::test]
async fn test_token_secret_and_activation() {
    let ctx = TestContext::new();
    let issued = ctx.service.create_token(&ctx.author, "app-1", false).await.unwrap();
    assert!(issued.secret.starts_with("appToken_"));

    let token = ctx.service.find_token_by_secret(&issued.secret).await.unwrap();
    assert_eq!(token.app_id, "app-1");
    assert!(token.is_active());
    assert!(!token.secret_hash.contains(&issued.secret));

    let unchanged = ctx.service.activate_token(&ctx.author, "app-1").await.unwrap();
    assert_eq!(unchanged, issued.revision);

    let deactivated = ctx.service.deactivate_token(&ctx.author, "app-1").await.unwrap();
    assert_eq!(deactivated, issued.revision.forward(1));
    let token = ctx.service.find_token_by_secret(&issued.secret).await.unwrap();
    assert!(!token.is_active());
    assert!(token.deactivation.is_some());

    ctx.service.activate_token(&ctx.author, "app-1").await.unwrap();
    let token = ctx.service.find_token_by_app_id("app-1").await.unwrap();
    assert!(token.is_active());
    assert!(token.activation.is_some());

    let forged = format!("{}x", &issued.secret[..issued.secret.len() - 1]);
    assert!(matches!(
        ctx.service.find_token_by_secret(&forged).await,
        Err(Error::TokenNotFound(_))
    ));

    ctx.service.destroy_token(&ctx.author, "app-1").await.unwrap();
    assert!(matches!(
        ctx.service.find_token_by_secret(&issued.secret).await,
        Err(Error::TokenNotFound(_))
    ));
    assert!(matches!(
        ctx.service.activate_token(&ctx.author, "app-1").await,
        Err(Error::TokenNotFound(_))
    ));
}

#[tokio::test]
async fn test_update_token_level() {
    let ctx = TestContext::new();
    ctx.service.create_token(&ctx.author, "app-1", false).await.unwrap();

    let promoted = ctx.service.update_token_level(&ctx.author, "app-1", true).await.unwrap();
    assert!(ctx.service.find_token_by_app_id("app-1").await.unwrap().system_admin);

    let rev = ctx.service.update_token_level(&ctx.author, "app-1", false).await.unwrap();
    assert_eq!(rev, promoted.forward(1));
    assert!(!ctx.service.find_token_by_app_id("app-1").await.unwrap().system_admin);
    let again = ctx.service.update_token_level(&ctx.author, "app-1", false).await.unwrap();
    assert_eq!(again, rev);
}

#[tokio::test]
async fn test_update_write_quota() {
    let ctx = TestContext::new();
    ctx.project("foo").await;
    ctx.service
        .add_repo_with_defaults(&ctx.author, "foo", "apple")
        .await
        .unwrap();
    assert!(ctx.service.get_repo("foo", "apple").await.unwrap().write_quota.is_none());

    let quota = QuotaConfig::new(5, 2).unwrap();
    ctx.service
        .update_write_quota(&ctx.author, "foo", "apple", quota)
        .await
        .unwrap();
    let stored = ctx.service.get_repo("foo", "apple").await.unwrap().write_quota;
    assert_eq!(stored, Some(quota));
    assert_eq!(quota.permits_per_second(), 2.5);

    assert!(matches!(QuotaConfig::new(0, 1), Err(Error::BadRequest(_))));
    for (request_quota, time_window_seconds) in [(0, 0), (0, 10), (10, 0)] {
        let invalid = QuotaConfig {
            request_quota,
            time_window_seconds,
        };
        assert!(matches!(
            ctx.service
                .update_write_quota(&ctx.author, "foo", "apple", invalid)
                .await,
            Err(Error::BadRequest(_))
        ));
    }
    let stored = ctx.service.get_repo("foo", "apple").await.unwrap().write_quota;
    assert_eq!(stored, Some(quota));
    assert!(matches!(
        ctx.service
            .update_write_quota(&ctx.author, "foo", "nope", quota)
            .await,
        Err(Error::RepositoryNotFound { .. })
    ));
}

#[tokio::test]
async fn test_role_resolution_precedence() {
    let ctx = TestContext::new();
    ctx.project("foo").await;
    ctx.service
        .add_repo(
            &ctx.author,
            "foo",
            "apple",
            ProjectRoles::of(Some(RepositoryRole::Write), Some(RepositoryRole::Read)),
        )
        .await
        .unwrap();
    let member = user("member@localhost.com");
    ctx.service
        .add_member(&ctx.author, "foo", &member, ProjectRole::Member)
        .await
        .unwrap();

    let role = |identity: Identity| {
        let service = &ctx.service;
        async move { service.find_repository_role("foo", "apple", &identity).await.unwrap() }
    };

    assert_eq!(role(Identity::from(&ctx.author)).await, Some(RepositoryRole::Admin));
    let admin = User::system_admin("root@localhost.com").unwrap();
    assert_eq!(role(admin.into()).await, Some(RepositoryRole::Admin));
    assert_eq!(role(Identity::from(&member)).await, Some(RepositoryRole::Write));
    assert_eq!(role(user("stranger@localhost.com").into()).await, Some(RepositoryRole::Read));
    assert_eq!(role(Identity::Anonymous).await, Some(RepositoryRole::Read));

    ctx.service
        .update_member_role(&ctx.author, "foo", &member, ProjectRole::Owner)
        .await
        .unwrap();
    assert_eq!(role(Identity::from(&member)).await, Some(RepositoryRole::Admin));

    assert!(matches!(
        ctx.service
            .find_repository_role("foo", "nope", &Identity::Anonymous)
            .await,
        Err(Error::RepositoryNotFound { .. })
    ));
}

#[tokio::test]
async fn test_sqlite_backed_service() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::new(temp_dir.path().join("repometa.db")).unwrap());
    store.initialize().unwrap();
    let service = MetadataService::new(store.clone()).with_catalog(store.clone());
    let author = user("author@localhost.localdomain");

    let created = service.create_project(&author, "foo").await.unwrap();
    assert_eq!(created, Revision::INIT);

    store
        .register_repository("foo", "apple", &UserAndTimestamp::now(&author))
        .unwrap();
    let metadata = service.get_project("foo").await.unwrap();
    assert!(metadata.repo("apple").is_some());

    service
        .update_repository_project_roles(&author, "foo", "apple", ProjectRoles::none())
        .await
        .unwrap();
    let log = store.commit_log("projects/foo").unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].revision, Revision::INIT);
    assert_eq!(log[2].author, author.id());

    service.remove_repo(&author, "foo", "apple").await.unwrap();
    service.purge_repo(&author, "foo", "apple").await.unwrap();
    let metadata = service.get_project("foo").await.unwrap();
    assert!(metadata.repo("apple").is_none());
}

#[tokio::test]
async fn test_destroy_token_survives_concurrent_project_writes() {
    let (store, service) = intercepted();
    let author = user("author@localhost.localdomain");
    service.create_project(&author, "foo").await.unwrap();
    service.add_repo_with_defaults(&author, "foo", "apple").await.unwrap();
    service.create_token(&author, "app-1", false).await.unwrap();
    service
        .add_token(&author, "foo", "app-1", ProjectRole::Member)
        .await
        .unwrap();
    service
        .add_token_repository_role(&author, "foo", "apple", "app-1", RepositoryRole::Write)
        .await
        .unwrap();

    let carol = user("carol@localhost.com");
    store.before_next_commit("projects/foo", move |inner| {
        edit_document(inner, "projects/foo", |p: &mut ProjectMetadata| {
            membership::add_member(p, carol.id(), ProjectRole::Member, &UserAndTimestamp::now(&carol))
                .unwrap();
        });
    });

    service.destroy_token(&author, "app-1").await.unwrap();

    let metadata = service.get_project("foo").await.unwrap();
    assert!(metadata.token("app-1").is_none());
    assert!(metadata.repo("apple").unwrap().roles.tokens.is_empty());
    assert!(metadata.member("carol@localhost.com").is_some());
    assert_eq!(
        service
            .find_repository_role("foo", "apple", &Identity::Token("app-1".into()))
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_purge_project_rechecks_after_concurrent_restore() {
    let (store, service) = intercepted();
    let author = user("author@localhost.localdomain");
    service.create_project(&author, "foo").await.unwrap();
    service.remove_project(&author, "foo").await.unwrap();

    store.before_next_delete("projects/foo", |inner| {
        edit_document(inner, "projects/foo", |p: &mut ProjectMetadata| p.removal = None);
    });

    assert!(matches!(
        service.purge_project(&author, "foo").await,
        Err(Error::ProjectNotFound(_))
    ));
    let metadata = service.get_project("foo").await.unwrap();
    assert!(!metadata.is_removed());
}

#[tokio::test]
async fn test_purge_project_retries_over_unrelated_write() {
    let (store, service) = intercepted();
    let author = user("author@localhost.localdomain");
    service.create_project(&author, "foo").await.unwrap();
    service.remove_project(&author, "foo").await.unwrap();

    let carol = user("carol@localhost.com");
    store.before_next_delete("projects/foo", move |inner| {
        edit_document(inner, "projects/foo", |p: &mut ProjectMetadata| {
            membership::add_member(p, carol.id(), ProjectRole::Member, &UserAndTimestamp::now(&carol))
                .unwrap();
        });
    });

    service.purge_project(&author, "foo").await.unwrap();
    assert!(matches!(
        service.get_project("foo").await,
        Err(Error::ProjectNotFound(_))
    ));
}

#[tokio::test]
async fn test_concurrent_duplicate_change_returns_existing_revision() {
    let (store, service) = intercepted();
    let author = user("author@localhost.localdomain");
    service.create_project(&author, "foo").await.unwrap();
    service.add_repo_with_defaults(&author, "foo", "apple").await.unwrap();

    let roles = ProjectRoles::of(Some(RepositoryRole::Read), Some(RepositoryRole::Read));
    store.before_next_commit("projects/foo", move |inner| {
        edit_document(inner, "projects/foo", |p: &mut ProjectMetadata| {
            p.repos.get_mut("apple").unwrap().roles.projects = roles;
        });
    });

    let before = store.inner.fetch_latest("projects/foo").unwrap().unwrap().revision;
    let revision = service
        .update_repository_project_roles(&author, "foo", "apple", roles)
        .await
        .unwrap();

    assert_eq!(revision, before.forward(1));
    let head = store.inner.fetch_latest("projects/foo").unwrap().unwrap().revision;
    assert_eq!(revision, head);
    assert_eq!(service.get_repo("foo", "apple").await.unwrap().roles.projects, roles);
}

#[tokio::test]
async fn test_concurrent_different_change_is_a_conflict() {
    let (store, service) = intercepted();
    let author = user("author@localhost.localdomain");
    service.create_project(&author, "foo").await.unwrap();
    service.add_repo_with_defaults(&author, "foo", "apple").await.unwrap();

    store.before_next_commit("projects/foo", |inner| {
        edit_document(inner, "projects/foo", |p: &mut ProjectMetadata| {
            p.repos.get_mut("apple").unwrap().roles.projects = ProjectRoles::none();
        });
    });

    let before = store.inner.fetch_latest("projects/foo").unwrap().unwrap().revision;
    let result = service
        .update_repository_project_roles(
            &author,
            "foo",
            "apple",
            ProjectRoles::of(Some(RepositoryRole::Read), None),
        )
        .await;

    match result {
        Err(Error::ChangeConflict { base, head, .. }) => {
            assert_eq!(base, before);
            assert_eq!(head, before.forward(1));
        }
        other => panic!("expected ChangeConflict, got {other:?}"),
    }
    let repo = service.get_repo("foo", "apple").await.unwrap();
    assert_eq!(repo.roles.projects, ProjectRoles::none());
}

#[tokio::test]
async fn test_token_destroyed_while_being_registered() {
    let (store, service) = intercepted();
    let author = user("author@localhost.localdomain");
    service.create_project(&author, "foo").await.unwrap();
    service.create_token(&author, "app-1", false).await.unwrap();

    store.before_next_commit("projects/foo", |inner| {
        edit_document(inner, "tokens", |t: &mut Tokens| {
            let deletion = UserAndTimestamp::now(&User::system());
            membership::destroy_token(t, "app-1", &deletion).unwrap();
        });
    });

    assert!(matches!(
        service
            .add_token(&author, "foo", "app-1", ProjectRole::Member)
            .await,
        Err(Error::TokenNotFound(_))
    ));
    let metadata = service.get_project("foo").await.unwrap();
    assert!(metadata.token("app-1").is_none());
}
