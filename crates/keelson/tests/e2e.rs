// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests over the tutorial schema.
//!
//! Each test creates an isolated TestDb. Tests are independent and
//! order-insensitive.

use keelson_storage::{
    KeelsonError, KeelsonResult, ObjectState, Select, column, is_constraint_violation,
};
use keelson_test_utils::TestDb;
use keelson_tutorial::models::{Address, User};
use proptest::prelude::*;

// ---- Identity and round trips ----

#[test]
fn committed_user_is_found_by_a_fresh_session() {
    let db = TestDb::memory().unwrap();
    let mut session = db.session();
    let patrick = session.add(User::named("patrick")).unwrap();
    session.commit().unwrap();
    let id = session.entity(&patrick).unwrap().id.unwrap();
    session.close().unwrap();

    let mut fresh = db.session();
    let found = fresh.get::<User>(id).unwrap().unwrap();
    assert_eq!(fresh.entity(&found).unwrap().name, "patrick");
    assert_eq!(fresh.state(&found).unwrap(), ObjectState::Persistent);
}

#[test]
fn aggregates_round_trip_equal() {
    let db = TestDb::memory().unwrap();
    let mut session = db.session();
    let sandy = session
        .add(
            User::new("sandy", "Sandy Cheeks")
                .with_address("sandy@sqlalchemy.org")
                .with_address("sandy@squirrelpower.org"),
        )
        .unwrap();
    session.commit().unwrap();
    let saved = session.entity(&sandy).unwrap().clone();
    session.close().unwrap();

    let mut fresh = db.session();
    let loaded = fresh.get::<User>(saved.id.unwrap()).unwrap().unwrap();
    assert_eq!(fresh.entity(&loaded).unwrap(), &saved);
    let owner = fresh.resolve(&saved.addresses[0].user).unwrap().unwrap();
    assert_eq!(owner, loaded);
}

// ---- Cascades ----

#[test]
fn deleting_a_user_deletes_its_addresses() {
    let db = TestDb::memory().unwrap();
    db.seed_users([
        User::named("spongebob").with_address("spongebob@sqlalchemy.org"),
        User::named("patrick")
            .with_address("patrick@sqlalchemy.org")
            .with_address("patrickstar@sqlalchemy.org"),
    ])
    .unwrap();

    let mut session = db.session();
    let patrick = session.get::<User>(2).unwrap().unwrap();
    session.delete(&patrick).unwrap();
    session.commit().unwrap();

    assert_eq!(db.count("user_account").unwrap(), 1);
    assert_eq!(db.count("address").unwrap(), 1);
}

#[test]
fn deleting_an_address_leaves_its_user() {
    let db = TestDb::memory().unwrap();
    db.seed_users([User::named("sandy")
        .with_address("sandy@sqlalchemy.org")
        .with_address("sandy@squirrelpower.org")])
        .unwrap();

    let mut session = db.session();
    let address = session.get::<Address>(1).unwrap().unwrap();
    assert!(address.is_owned());
    session.delete(&address).unwrap();
    session.commit().unwrap();

    assert_eq!(db.count("user_account").unwrap(), 1);
    assert_eq!(db.count("address").unwrap(), 1);
    let sandy = session.get::<User>(1).unwrap().unwrap();
    assert_eq!(session.entity(&sandy).unwrap().addresses.len(), 1);
}

// ---- Transactions ----

#[test]
fn rolled_back_session_writes_are_invisible() {
    let db = TestDb::memory().unwrap();
    let mut session = db.session();
    let ed = session.add(User::named("ed")).unwrap();
    session.flush().unwrap();
    assert_eq!(session.state(&ed).unwrap(), ObjectState::Persistent);
    session.rollback().unwrap();

    assert_eq!(session.state(&ed).unwrap(), ObjectState::Pending);
    assert_eq!(db.count("user_account").unwrap(), 0);
}

#[test]
fn rejected_commit_keeps_pending_state_for_a_retry() {
    let db = TestDb::memory().unwrap();
    db.engine()
        .begin(|conn| {
            conn.execute(
                "CREATE TABLE audit (id INTEGER PRIMARY KEY, \
                 user_id INTEGER REFERENCES user_account (id) DEFERRABLE INITIALLY DEFERRED)",
                (),
            )?;
            KeelsonResult::Ok(())
        })
        .unwrap();

    let mut session = db.session();
    let ghost = session.add(User::named("ghost")).unwrap();
    session
        .execute("INSERT INTO audit (user_id) VALUES (999)", ())
        .unwrap();
    assert_eq!(session.entity(&ghost).unwrap().id, Some(1));

    let err = session.commit().unwrap_err();
    assert!(matches!(err, KeelsonError::Commit { .. }));
    assert!(is_constraint_violation(&err));
    assert!(!session.in_transaction());
    assert_eq!(session.state(&ghost).unwrap(), ObjectState::Pending);
    assert_eq!(session.entity(&ghost).unwrap().id, None);

    session.commit().unwrap();
    assert_eq!(session.state(&ghost).unwrap(), ObjectState::Persistent);
    assert_eq!(db.count("user_account").unwrap(), 1);
    assert_eq!(db.count("audit").unwrap(), 0);
}

#[test]
fn rejected_commit_keeps_a_pending_delete_for_the_retry() {
    let db = TestDb::memory().unwrap();
    let mut session = db.session();
    let a = session.add(User::named("a")).unwrap();
    session.commit().unwrap();

    session.delete(&a).unwrap();
    let stray = session.add(Address::new("nobody@example.com")).unwrap();
    let err = session.commit().unwrap_err();
    assert!(is_constraint_violation(&err));
    assert_eq!(session.state(&a).unwrap(), ObjectState::Deleted);
    assert_eq!(db.count("user_account").unwrap(), 1);

    session.expunge(&stray).unwrap();
    session.commit().unwrap();
    assert_eq!(session.state(&a).unwrap(), ObjectState::Detached);
    assert_eq!(db.count("user_account").unwrap(), 0);
}

#[test]
fn rejected_commit_keeps_a_pending_update_for_the_retry() {
    let db = TestDb::memory().unwrap();
    let mut session = db.session();
    let ed = session.add(User::named("ed")).unwrap();
    session.commit().unwrap();
    let id = session.entity(&ed).unwrap().id.unwrap();

    session.entity_mut(&ed).unwrap().fullname = Some("Ed Jones".into());
    let stray = session.add(Address::new("nobody@example.com")).unwrap();
    assert!(session.commit().is_err());
    assert_eq!(session.state(&ed).unwrap(), ObjectState::Dirty);

    session.expunge(&stray).unwrap();
    session.commit().unwrap();
    session.close().unwrap();

    let mut fresh = db.session();
    let loaded = fresh.get::<User>(id).unwrap().unwrap();
    assert_eq!(fresh.entity(&loaded).unwrap().fullname.as_deref(), Some("Ed Jones"));
}

// ---- Queries ----

#[test]
fn queries_skip_pending_rows_without_autoflush() {
    let db = TestDb::builder().with_autoflush(false).build().unwrap();
    let mut session = db.session();
    session.add(User::named("ed")).unwrap();
    let everyone = Select::entity::<User>();
    assert!(session.scalars::<User>(&everyone).unwrap().is_empty());

    session.flush().unwrap();
    assert_eq!(session.scalars::<User>(&everyone).unwrap().len(), 1);
}

#[test]
fn one_reports_cardinality() {
    let db = TestDb::memory().unwrap();
    db.seed_users([User::named("ed"), User::named("ed"), User::named("wendy")])
        .unwrap();

    let mut session = db.session();
    let by_name = |name: &'static str| Select::entity::<User>().filter(column::<User>("name").eq(name));
    let twice = session.scalars::<User>(&by_name("ed")).unwrap().one();
    assert!(matches!(twice, Err(KeelsonError::MultipleResults { count: 2, .. })));
    let missing = session.scalars::<User>(&by_name("mary")).unwrap().one();
    assert!(matches!(missing, Err(KeelsonError::NotFound(_))));
    let wendy = session.scalars::<User>(&by_name("wendy")).unwrap().one().unwrap();
    assert_eq!(session.entity(&wendy).unwrap().id, Some(3));
}

#[test]
fn where_clause_on_some_table() {
    let db = TestDb::memory().unwrap();
    db.seed_some_table(&[(1, 1), (2, 4)]).unwrap();

    let mut conn = db.engine().connect().unwrap();
    let rows: Vec<(i64, i64)> = conn
        .execute(
            "SELECT x, y FROM some_table WHERE y > :y",
            keelson_storage::params! { "y" => 2 },
        )
        .unwrap()
        .map(|row| (row.get("x").unwrap(), row.get("y").unwrap()))
        .collect();
    assert_eq!(rows, [(2, 4)]);
}

// ---- Concurrency ----

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn factory_sessions_run_on_worker_threads() {
    let db = TestDb::builder().on_disk().build().unwrap();

    let mut tasks = Vec::new();
    for n in 0..8 {
        let factory = db.factory().clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            factory.begin(|session| {
                let user = User::named(format!("worker-{n}")).with_address(format!("w{n}@example.org"));
                session.add(user)?;
                KeelsonResult::Ok(())
            })
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(db.count("user_account").unwrap(), 8);
    assert_eq!(db.count("address").unwrap(), 8);
}

// ---- Properties ----

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn committed_users_read_back_unchanged(
        users in proptest::collection::vec(
            ("[a-z]{1,12}", proptest::option::of("[A-Z][a-z]{0,10}"), 0..3_usize),
            1..6,
        )
    ) {
        let db = TestDb::memory().unwrap();
        let users: Vec<User> = users
            .into_iter()
            .map(|(name, fullname, addresses)| {
                let mut user = User { name: name.clone(), fullname, ..User::default() };
                for i in 0..addresses {
                    user = user.with_address(format!("{name}{i}@example.org"));
                }
                user
            })
            .collect();

        let mut session = db.session();
        let handles = session.add_all(users).unwrap();
        session.commit().unwrap();
        let saved: Vec<User> = handles
            .iter()
            .map(|h| session.entity(h).unwrap().clone())
            .collect();
        session.close().unwrap();

        let mut fresh = db.session();
        for user in &saved {
            let found = fresh.get::<User>(user.id.unwrap()).unwrap().unwrap();
            prop_assert_eq!(fresh.entity(&found).unwrap(), user);
        }
    }
}
