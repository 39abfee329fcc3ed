//! End-to-end tests for the runner on top of SQLite
//!
//! Covers failures (conflicts, missing fields, partial batches), pending set
//! arithmetic, ledger repair and concurrent runners on one database.

mod common;

use chrono::Utc;
use common::{
    accounts_migrations, accounts_snapshot, TestDb, ACCOUNTS_ID, ACCOUNTS_NAME, ADDED_IS_ADMIN,
    ALL_ACCOUNTS_MIGRATIONS, CREATED_ACCOUNTS, EMAIL_FIELD_ID, RENAMED_IS_ADMIN, RENAMED_USERNAME,
};
use schema_migrate::runner::{Direction, DownTarget, MigrationStatus, RunError, RunOutcome, Runner};
use schema_migrate::store::{MemoryBackend, MigrationBackend};
use schema_migrate::{
    ChangeSet, Collection, ErrorKind, FieldDef, FieldRef, FieldType, Migration, MigrationId,
    MigrationSet, Operation,
};
use serde_json::json;
use std::thread;

fn with_extra(extra: Vec<Migration>) -> MigrationSet {
    let mut migrations = accounts_migrations();
    migrations.extend(extra);
    MigrationSet::new(migrations).unwrap()
}

fn broken_migration(id: MigrationId, name: &str, up: ChangeSet) -> Migration {
    Migration::new(id, name, up, ChangeSet::new(ACCOUNTS_ID))
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_rename_onto_existing_name_is_conflict() {
    let db = TestDb::new();
    let runner = Runner::new(
        db.backend.clone(),
        with_extra(vec![broken_migration(
            1732060000,
            "rename_email_to_password",
            ChangeSet::new(ACCOUNTS_ID).rename_field(FieldRef::by_name("email"), "password"),
        )]),
    );
    runner.up(Some(4)).unwrap();
    let before = accounts_snapshot(&db.backend);

    let err = runner.up(None).unwrap_err();
    let failure = err.failure().unwrap();
    assert_eq!(failure.id, 1732060000);
    assert_eq!(failure.name, "rename_email_to_password");
    assert_eq!(failure.kind(), ErrorKind::Conflict);
    assert!(failure.completed.is_empty());

    assert_eq!(accounts_snapshot(&db.backend), before);
    assert_eq!(runner.applied_ids().unwrap(), ALL_ACCOUNTS_MIGRATIONS.to_vec());
}

#[test]
fn test_removing_missing_field_is_not_found() {
    let db = TestDb::new();
    let runner = Runner::new(
        db.backend.clone(),
        with_extra(vec![broken_migration(
            1732060000,
            "remove_ghost",
            ChangeSet::new(ACCOUNTS_ID).remove_field(FieldRef::by_id("zzzzzzzz")),
        )]),
    );
    runner.up(Some(4)).unwrap();
    let ledger_before = runner.applied_ids().unwrap();

    let err = runner.up(None).unwrap_err();
    let failure = err.failure().unwrap();
    assert_eq!(failure.kind(), ErrorKind::NotFound);
    assert_eq!(failure.operation, Some(0));
    assert_eq!(failure.direction, Direction::Up);
    let message = failure.to_string();
    assert!(message.contains("1732060000"));
    assert!(message.contains("remove_ghost"));
    assert!(message.contains("NotFoundError"));

    assert_eq!(runner.applied_ids().unwrap(), ledger_before);
}

#[test]
fn test_change_set_is_all_or_nothing() {
    let db = TestDb::new();
    let runner = Runner::new(
        db.backend.clone(),
        with_extra(vec![broken_migration(
            1732060000,
            "half_broken",
            ChangeSet::new(ACCOUNTS_ID)
                .add_field(FieldDef::with_id("nick0001", "nickname", FieldType::Text))
                .remove_field(FieldRef::by_name("ghost")),
        )]),
    );
    runner.up(Some(4)).unwrap();

    let err = runner.up(None).unwrap_err();
    assert_eq!(err.failure().unwrap().operation, Some(1));

    let accounts = accounts_snapshot(&db.backend).unwrap();
    assert!(accounts.field_by_name("nickname").is_none());
    assert!(!runner.applied_ids().unwrap().contains(&1732060000));
}

#[test]
fn test_failure_keeps_completed_migrations() {
    let db = TestDb::new();
    let runner = Runner::new(
        db.backend.clone(),
        with_extra(vec![
            broken_migration(
                1732060000,
                "add_nickname",
                ChangeSet::new(ACCOUNTS_ID)
                    .add_field(FieldDef::with_id("nick0001", "nickname", FieldType::Text)),
            ),
            broken_migration(
                1732060001,
                "remove_ghost",
                ChangeSet::new(ACCOUNTS_ID).remove_field(FieldRef::by_name("ghost")),
            ),
            broken_migration(
                1732060002,
                "add_bio",
                ChangeSet::new(ACCOUNTS_ID)
                    .add_field(FieldDef::with_id("bio00001", "bio", FieldType::Editor)),
            ),
        ]),
    );
    runner.up(Some(4)).unwrap();

    let err = runner.up(None).unwrap_err();
    let failure = err.failure().unwrap();
    assert_eq!(failure.id, 1732060001);
    assert_eq!(failure.completed, vec![1732060000]);

    let accounts = accounts_snapshot(&db.backend).unwrap();
    assert!(accounts.field_by_name("nickname").is_some());
    assert!(accounts.field_by_name("bio").is_none());

    let pending: Vec<_> = runner.pending().unwrap().iter().map(|m| m.id).collect();
    assert_eq!(pending, vec![1732060001, 1732060002]);
}

// =============================================================================
// Collection replacement and field options
// =============================================================================

/// Accounts collection as left by the four accounts migrations.
fn final_accounts() -> Collection {
    accounts_migrations()
        .iter()
        .try_fold(None, |current, m| m.up.apply(current.as_ref()))
        .unwrap()
        .unwrap()
}

fn recreate_accounts<B: MigrationBackend>(backend: B) {
    let original = final_accounts();
    let replacement = Collection::new("newid0000000001", ACCOUNTS_NAME)
        .with_field(FieldDef::with_id("nick0001", "nickname", FieldType::Text));
    let recreate = Migration::new(
        1732060000,
        "recreate_accounts",
        ChangeSet::new(ACCOUNTS_NAME)
            .delete_collection()
            .create_collection(replacement.clone()),
        ChangeSet::new(ACCOUNTS_NAME)
            .delete_collection()
            .create_collection(original.clone()),
    );
    let runner = Runner::new(backend, with_extra(vec![recreate]));
    runner.up(Some(4)).unwrap();
    assert_eq!(accounts_snapshot(runner.backend()), Some(original.clone()));

    assert_eq!(runner.up(None).unwrap().migrations(), &[1732060000]);
    let collections = runner.backend().atomically(|s| s.list_collections()).unwrap();
    assert_eq!(collections, vec![replacement]);

    assert_eq!(
        runner.down(DownTarget::Count(1)).unwrap().migrations(),
        &[1732060000]
    );
    let collections = runner.backend().atomically(|s| s.list_collections()).unwrap();
    assert_eq!(collections, vec![original]);
    assert_eq!(runner.applied_ids().unwrap(), ALL_ACCOUNTS_MIGRATIONS.to_vec());
}

#[test]
fn test_recreate_collection_under_new_id_on_sqlite() {
    let db = TestDb::new();
    recreate_accounts(db.backend.clone());
}

#[test]
fn test_recreate_collection_under_new_id_in_memory() {
    recreate_accounts(MemoryBackend::new());
}

fn set_email_options(options: serde_json::Value, flags: bool) -> ChangeSet {
    ChangeSet::new(ACCOUNTS_ID).push(Operation::SetFieldOptions {
        field: FieldRef::by_id(EMAIL_FIELD_ID),
        options: options.as_object().unwrap().clone(),
        required: Some(flags),
        unique: Some(flags),
    })
}

#[test]
fn test_field_options_round_trip() {
    let db = TestDb::new();
    let restrict = Migration::new(
        1732060000,
        "restrict_email_domains",
        set_email_options(
            json!({"exceptDomains": null, "onlyDomains": ["example.com"]}),
            true,
        ),
        set_email_options(json!({"exceptDomains": null, "onlyDomains": null}), false),
    );
    let runner = Runner::new(db.backend.clone(), with_extra(vec![restrict]));
    runner.up(Some(4)).unwrap();
    let before = accounts_snapshot(&db.backend).unwrap();

    assert_eq!(runner.up(None).unwrap().migrations(), &[1732060000]);
    let accounts = accounts_snapshot(&db.backend).unwrap();
    let email = accounts.field_by_id(EMAIL_FIELD_ID).unwrap();
    assert!(email.required);
    assert!(email.unique);
    assert_eq!(email.options["onlyDomains"], json!(["example.com"]));
    assert_eq!(email.name, "email");

    runner.down(DownTarget::Count(1)).unwrap();
    assert_eq!(accounts_snapshot(&db.backend).unwrap(), before);
}

// =============================================================================
// Pending set
// =============================================================================

#[test]
fn test_pending_shrinks_by_applied_count() {
    let db = TestDb::new();
    let runner = Runner::new(db.backend.clone(), with_extra(vec![]));

    assert_eq!(runner.pending().unwrap().len(), 4);
    runner.up(Some(1)).unwrap();
    assert_eq!(runner.pending().unwrap().len(), 3);
    runner.up(Some(2)).unwrap();
    assert_eq!(runner.pending().unwrap().len(), 1);
    runner.up(None).unwrap();
    assert!(runner.pending().unwrap().is_empty());
}

#[test]
fn test_older_unapplied_migrations_are_skipped() {
    let db = TestDb::new();
    let runner = Runner::new(db.backend.clone(), with_extra(vec![]));
    runner.up(None).unwrap();

    // A migration that shows up later with an id older than the newest applied one
    let late = Migration::reversible(
        1732051900,
        "late_addition",
        ChangeSet::new(ACCOUNTS_ID).add_field(FieldDef::with_id(
            "late0001",
            "late",
            FieldType::Text,
        )),
    )
    .unwrap();
    let runner = Runner::new(db.backend.clone(), with_extra(vec![late]));

    assert_eq!(runner.up(None).unwrap(), RunOutcome::NothingToDo);
    let status = runner.status().unwrap();
    let late_status = status.iter().find(|e| e.id == 1732051900).unwrap();
    assert_eq!(late_status.status, MigrationStatus::Skipped);
    assert!(accounts_snapshot(&db.backend)
        .unwrap()
        .field_by_name("late")
        .is_none());
}

// =============================================================================
// Down targets
// =============================================================================

#[test]
fn test_down_to_target() {
    let db = TestDb::new();
    let runner = Runner::new(db.backend.clone(), with_extra(vec![]));
    runner.up(None).unwrap();

    let outcome = runner.down(DownTarget::To(RENAMED_USERNAME)).unwrap();
    assert_eq!(outcome.migrations(), &[RENAMED_IS_ADMIN, ADDED_IS_ADMIN]);
    assert_eq!(
        runner.applied_ids().unwrap(),
        vec![CREATED_ACCOUNTS, RENAMED_USERNAME]
    );
    assert_eq!(
        accounts_snapshot(&db.backend).unwrap().field_names(),
        vec!["email", "password"]
    );

    assert!(runner.down(DownTarget::To(RENAMED_USERNAME)).unwrap().is_noop());
}

#[test]
fn test_down_with_empty_ledger_is_noop() {
    let db = TestDb::new();
    let runner = Runner::new(db.backend.clone(), with_extra(vec![]));
    assert_eq!(runner.down(DownTarget::Count(1)).unwrap(), RunOutcome::NothingToDo);
    assert_eq!(runner.down(DownTarget::All).unwrap(), RunOutcome::NothingToDo);
}

// =============================================================================
// Ledger repair
// =============================================================================

#[test]
fn test_history_sync_drops_unknown_entries() {
    let db = TestDb::new();
    let runner = Runner::new(db.backend.clone(), with_extra(vec![]));
    runner.up(Some(2)).unwrap();
    db.backend
        .atomically(|s| s.mark_applied(1732099999, Utc::now()))
        .unwrap();

    match runner.up(None) {
        Err(RunError::UnknownApplied(ids)) => assert_eq!(ids, vec![1732099999]),
        other => panic!("expected unknown applied error, got {:?}", other),
    }

    let status = runner.status().unwrap();
    let unknown = status.last().unwrap();
    assert_eq!(unknown.id, 1732099999);
    assert!(unknown.name.is_none());
    assert_eq!(unknown.status.label(), "unknown");

    assert_eq!(runner.sync_history().unwrap(), vec![1732099999]);
    assert_eq!(
        runner.up(None).unwrap().migrations(),
        &[ADDED_IS_ADMIN, RENAMED_IS_ADMIN]
    );
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_runners_apply_each_migration_once() {
    let db = TestDb::new();
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let runner = Runner::new(db.reopen(), with_extra(vec![]));
            thread::spawn(move || runner.up(None).map(|outcome| outcome.migrations().to_vec()))
        })
        .collect();

    let mut applied: Vec<MigrationId> = Vec::new();
    for handle in handles {
        applied.extend(handle.join().unwrap().unwrap());
    }
    applied.sort();
    assert_eq!(applied, ALL_ACCOUNTS_MIGRATIONS.to_vec());

    let runner = Runner::new(db.backend.clone(), with_extra(vec![]));
    assert_eq!(runner.applied_ids().unwrap(), ALL_ACCOUNTS_MIGRATIONS.to_vec());
    assert_eq!(
        accounts_snapshot(&db.backend).unwrap().field_names(),
        vec!["email", "password", "is_admin"]
    );
}
