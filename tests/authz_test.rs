//! Integration tests for the authorization engine against real storage.
//!
//! Decision functions are pure; these tests exercise them the way the RPC
//! handlers do — load a `ProjectAccess` snapshot from SQLite, then decide.
//!
//! Covers:
//! 1. Project read iff owner or member
//! 2. Member rights on tasks: read/create/update allowed, delete forbidden
//! 3. Membership removal flips read to NotFound
//! 4. Comment authorship and the owner override on delete
//! 5. Owner membership row materialized atomically with the project

use collabd::authz::{self, AccessError, Decision, DenyReason};
use collabd::identity::ActorId;
use collabd::membership::{MembershipStore, ProjectAccess, ProjectId, Role};
use collabd::storage::Storage;

async fn storage() -> Storage {
    Storage::in_memory().await.unwrap()
}

async fn access(db: &Storage, project: &str, actor: &ActorId) -> ProjectAccess {
    ProjectAccess::load(db, &ProjectId::new(project), actor)
        .await
        .unwrap()
}

// ─── Test 1: project read requires standing ──────────────────────────────────

#[tokio::test]
async fn project_read_iff_owner_or_member() {
    let db = storage().await;
    let alice = ActorId::from("alice");
    let bob = ActorId::from("bob");
    let mallory = ActorId::from("mallory");
    let project = db.create_project("P1", None, None, &alice).await.unwrap();
    db.add_member(&project.id, "bob", Role::Member).await.unwrap();

    assert!(authz::project::read(access(&db, &project.id, &alice).await).is_allow());
    assert!(authz::project::read(access(&db, &project.id, &bob).await).is_allow());
    assert_eq!(
        authz::project::read(access(&db, &project.id, &mallory).await),
        Decision::Deny(DenyReason::NotFound)
    );
}

// ─── Test 2: alice owns P1, bob is a member ──────────────────────────────────

#[tokio::test]
async fn member_may_work_tasks_but_not_delete_project() {
    let db = storage().await;
    let alice = ActorId::from("alice");
    let bob = ActorId::from("bob");
    let project = db.create_project("P1", None, None, &alice).await.unwrap();
    db.add_member(&project.id, "bob", Role::Member).await.unwrap();

    let bob_access = access(&db, &project.id, &bob).await;
    assert!(authz::task::read(bob_access).is_allow());
    assert!(authz::task::create(bob_access).is_allow());
    assert!(authz::task::update(bob_access).is_allow());

    // Visible but underprivileged — the deny names the real reason.
    assert_eq!(
        authz::project::delete(bob_access),
        Decision::Deny(DenyReason::Forbidden)
    );
    assert_eq!(
        authz::task::delete(bob_access),
        Decision::Deny(DenyReason::Forbidden)
    );
}

// ─── Test 3: removal flips visibility to NotFound ────────────────────────────

#[tokio::test]
async fn removed_member_sees_nothing() {
    let db = storage().await;
    let alice = ActorId::from("alice");
    let bob = ActorId::from("bob");
    let project = db.create_project("P1", None, None, &alice).await.unwrap();
    db.add_member(&project.id, "bob", Role::Member).await.unwrap();

    assert!(authz::project::read(access(&db, &project.id, &bob).await).is_allow());

    assert!(db.remove_member(&project.id, "bob").await.unwrap());

    // Not Forbidden: to a non-member the project no longer exists.
    assert_eq!(
        authz::project::read(access(&db, &project.id, &bob).await),
        Decision::Deny(DenyReason::NotFound)
    );
}

// ─── Test 4: comment authorship, owner override on delete only ───────────────

#[tokio::test]
async fn comment_rules_carol_and_dave() {
    let db = storage().await;
    let dave = ActorId::from("dave");
    let carol = ActorId::from("carol");
    let project = db.create_project("P", None, None, &dave).await.unwrap();
    db.add_member(&project.id, "carol", Role::Member).await.unwrap();
    let task = db
        .create_task(&project.id, "T", None, "todo", "medium", None, None)
        .await
        .unwrap();
    let comment = db.create_comment(&task.id, &carol, "mine").await.unwrap();
    let author = ActorId::from(comment.user_id.as_str());

    let carol_access = access(&db, &project.id, &carol).await;
    let dave_access = access(&db, &project.id, &dave).await;

    // Author edits; the owner may not.
    assert!(authz::comment::update(&carol, &author, carol_access).is_allow());
    assert_eq!(
        authz::comment::update(&dave, &author, dave_access),
        Decision::Deny(DenyReason::Forbidden)
    );

    // Delete: author and owner both qualify, independently.
    assert!(authz::comment::delete(&carol, &author, carol_access).is_allow());
    assert!(authz::comment::delete(&dave, &author, dave_access).is_allow());

    // A second plain member qualifies on neither path.
    db.add_member(&project.id, "frank", Role::Member).await.unwrap();
    let frank = ActorId::from("frank");
    let frank_access = access(&db, &project.id, &frank).await;
    assert_eq!(
        authz::comment::delete(&frank, &author, frank_access),
        Decision::Deny(DenyReason::Forbidden)
    );

    // And an admin qualifies through the role path alone.
    db.add_member(&project.id, "erin", Role::Admin).await.unwrap();
    let erin = ActorId::from("erin");
    let erin_access = access(&db, &project.id, &erin).await;
    assert!(authz::comment::delete(&erin, &author, erin_access).is_allow());
}

// ─── Test 5: owner rights hold through either representation ─────────────────

#[tokio::test]
async fn owner_rights_from_row_and_from_column() {
    let db = storage().await;
    let alice = ActorId::from("alice");
    let project = db.create_project("P1", None, None, &alice).await.unwrap();
    let pid = ProjectId::new(project.id.clone());

    // Both sources of truth are populated at creation...
    assert!(db.is_owner(&pid, &alice).await.unwrap());
    assert_eq!(
        db.membership_role(&pid, &alice).await.unwrap(),
        Some(Role::Owner)
    );

    // ...and each alone is sufficient for owner-only operations.
    let row_only = ProjectAccess {
        is_owner: false,
        role: Some(Role::Owner),
    };
    let column_only = ProjectAccess {
        is_owner: true,
        role: None,
    };
    assert!(authz::project::delete(row_only).is_allow());
    assert!(authz::project::delete(column_only).is_allow());
}

// ─── Error propagation ───────────────────────────────────────────────────────

#[tokio::test]
async fn denials_convert_to_typed_errors() {
    let db = storage().await;
    let alice = ActorId::from("alice");
    let mallory = ActorId::from("mallory");
    let project = db.create_project("P1", None, None, &alice).await.unwrap();

    let denied = authz::project::read(access(&db, &project.id, &mallory).await).into_result();
    assert_eq!(denied, Err(AccessError::NotFound));
}
