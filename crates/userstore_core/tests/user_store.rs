use rusqlite::{Transaction, TransactionBehavior};
use userstore_core::{
    open_db, open_db_in_memory, FindQuery, RepoError, Scope, SqliteUserRepository, User,
    UserRepository,
};

fn find_all(repo: &SqliteUserRepository<'_>) -> Vec<User> {
    repo.find_users(Scope::Standalone, None, &User::default())
        .unwrap()
}

fn find_with(
    repo: &SqliteUserRepository<'_>,
    customize: &dyn Fn(&mut FindQuery),
) -> Result<Vec<User>, RepoError> {
    repo.find_users(Scope::Standalone, Some(customize), &User::default())
}

#[test]
fn insert_assigns_id_and_equal_timestamps() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);

    let mut user = User::new("Alice");
    repo.insert_user(Scope::Standalone, &mut user).unwrap();

    assert_eq!(user.id, 1);
    assert_eq!(user.name, "Alice");
    assert!(user.created_at > 0);
    assert_eq!(user.created_at, user.updated_at);
    assert!(user.is_persisted());
}

#[test]
fn insert_timestamps_carry_millisecond_resolution() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);

    let before_ms = epoch_ms_now();
    let mut stamps = Vec::new();
    for name in ["a", "b", "c", "d"] {
        let mut user = User::new(name);
        repo.insert_user(Scope::Standalone, &mut user).unwrap();
        stamps.push(user.created_at);
        std::thread::sleep(std::time::Duration::from_millis(3));
    }
    let after_ms = epoch_ms_now();

    assert!(stamps
        .iter()
        .all(|stamp| *stamp >= before_ms - 1 && *stamp <= after_ms + 1));
    assert!(
        stamps.iter().any(|stamp| stamp % 1000 != 0),
        "timestamps are truncated to whole seconds: {stamps:?}"
    );
}

fn epoch_ms_now() -> i64 {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap();
    i64::try_from(elapsed.as_millis()).unwrap()
}

#[test]
fn insert_then_find_returns_the_stored_record() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);

    let mut user = User::new("Alice");
    repo.insert_user(Scope::Standalone, &mut user).unwrap();

    assert_eq!(find_all(&repo), vec![user.clone()]);

    let by_name = repo
        .find_users(Scope::Standalone, None, &User::new("Alice"))
        .unwrap();
    assert_eq!(by_name, vec![user]);
}

#[test]
fn insert_ignores_preassigned_id() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);

    let mut user = User {
        id: 42,
        ..User::new("Alice")
    };
    repo.insert_user(Scope::Standalone, &mut user).unwrap();
    assert_eq!(user.id, 1);
}

#[test]
fn insert_assigns_strictly_increasing_ids() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);

    let ids: Vec<i64> = ["a", "b", "c"]
        .into_iter()
        .map(|name| {
            let mut user = User::new(name);
            repo.insert_user(Scope::Standalone, &mut user).unwrap();
            user.id
        })
        .collect();

    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn default_filter_returns_every_row_ordered_by_id() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);

    for name in ["Carol", "Alice", "Bob"] {
        repo.insert_user(Scope::Standalone, &mut User::new(name))
            .unwrap();
    }

    let names: Vec<String> = find_all(&repo).into_iter().map(|user| user.name).collect();
    assert_eq!(names, vec!["Carol", "Alice", "Bob"]);
}

#[test]
fn non_zero_filter_fields_narrow_the_match() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);

    let mut alice = User::new("Alice");
    let mut bob = User::new("Bob");
    repo.insert_user(Scope::Standalone, &mut alice).unwrap();
    repo.insert_user(Scope::Standalone, &mut bob).unwrap();

    let filter = User {
        id: bob.id,
        ..User::default()
    };
    assert_eq!(
        repo.find_users(Scope::Standalone, None, &filter).unwrap(),
        vec![bob]
    );

    let no_match = repo
        .find_users(Scope::Standalone, None, &User::new("Mallory"))
        .unwrap();
    assert!(no_match.is_empty());
}

#[test]
fn customization_can_reorder_and_page() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);
    for name in ["a", "b", "c"] {
        repo.insert_user(Scope::Standalone, &mut User::new(name))
            .unwrap();
    }

    let page = find_with(&repo, &|query| {
        query.order_by("id DESC").limit(2).offset(1);
    })
    .unwrap();
    let names: Vec<&str> = page.iter().map(|user| user.name.as_str()).collect();
    assert_eq!(names, vec!["b", "a"]);
}

#[test]
fn aliased_aggregate_populates_only_the_id() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);
    repo.insert_user(Scope::Standalone, &mut User::new("Alice"))
        .unwrap();

    let expected = vec![User {
        id: 1,
        ..User::default()
    }];
    for select in ["MAX(id) AS id", "MAX( id) AS id", "max(id) as ID"] {
        let users = find_with(&repo, &|query| {
            query.select(select).limit(1);
        })
        .unwrap();
        assert_eq!(users, expected, "select {select:?}");
    }
}

#[test]
fn aliased_aggregate_is_deterministic_across_runs() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);
    repo.insert_user(Scope::Standalone, &mut User::new("Alice"))
        .unwrap();

    let customize = |query: &mut FindQuery| {
        query.select("MAX( id) AS id").limit(1);
    };
    let first = find_with(&repo, &customize).unwrap();
    let second = find_with(&repo, &customize).unwrap();
    assert_eq!(first, second);
}

#[test]
fn aggregate_over_empty_table_maps_null_to_zero_values() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);

    let users = find_with(&repo, &|query| {
        query.select("MAX(id) AS id").limit(1);
    })
    .unwrap();
    assert_eq!(users, vec![User::default()]);
}

#[test]
fn unaliased_aggregate_is_a_shape_mismatch_regardless_of_data() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);

    let customize = |query: &mut FindQuery| {
        query.select("MAX(id)").limit(1);
    };
    let empty_err = find_with(&repo, &customize).unwrap_err();
    assert!(empty_err.is_shape_mismatch());

    repo.insert_user(Scope::Standalone, &mut User::new("Alice"))
        .unwrap();
    let err = find_with(&repo, &customize).unwrap_err();
    match err {
        RepoError::ShapeMismatch {
            operation, column, ..
        } => {
            assert_eq!(operation, "find_users");
            assert_eq!(column, "MAX(id)");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn wrong_value_type_is_a_shape_mismatch() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);
    repo.insert_user(Scope::Standalone, &mut User::new("Alice"))
        .unwrap();

    let err = find_with(&repo, &|query| {
        query.select("name AS id");
    })
    .unwrap_err();
    assert!(err.is_shape_mismatch());
    assert!(!err.is_storage());
}

#[test]
fn malformed_select_is_a_storage_failure_with_context() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);

    let err = find_with(&repo, &|query| {
        query.select("MAX(id AS id");
    })
    .unwrap_err();
    assert!(err.is_storage());
    assert_eq!(err.operation(), "find_users");
    assert!(err.to_string().contains("MAX(id AS id"));
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn caller_scope_insert_is_discarded_on_rollback() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);

    let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate).unwrap();
    let mut user = User::new("Bob");
    repo.insert_user(Scope::Caller(&tx), &mut user).unwrap();
    assert_eq!(user.id, 1);

    let inside = repo
        .find_users(Scope::Caller(&tx), None, &User::default())
        .unwrap();
    assert_eq!(inside, vec![user]);

    tx.rollback().unwrap();
    assert!(find_all(&repo).is_empty());
}

#[test]
fn caller_scope_insert_is_visible_only_after_owner_commits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.db");
    let conn = open_db(&path).unwrap();
    let observer = open_db(&path).unwrap();
    let repo = SqliteUserRepository::new(&conn);
    let observer_repo = SqliteUserRepository::new(&observer);

    let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate).unwrap();
    let mut user = User::new("Bob");
    repo.insert_user(Scope::Caller(&tx), &mut user).unwrap();
    assert!(find_all(&observer_repo).is_empty());

    tx.commit().unwrap();
    assert_eq!(find_all(&observer_repo), vec![user]);
}

#[test]
fn standalone_call_inside_open_caller_transaction_fails_without_side_effects() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::new(&conn);

    let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Deferred).unwrap();
    let mut user = User::new("Eve");
    let err = repo
        .insert_user(Scope::Standalone, &mut user)
        .unwrap_err();
    assert!(err.is_storage());
    assert_eq!(user, User::new("Eve"));
    drop(tx);
}

#[test]
fn records_survive_reopening_a_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.db");

    let mut user = User::new("Alice");
    {
        let conn = open_db(&path).unwrap();
        SqliteUserRepository::new(&conn)
            .insert_user(Scope::Standalone, &mut user)
            .unwrap();
    }

    let conn = open_db(&path).unwrap();
    assert_eq!(find_all(&SqliteUserRepository::new(&conn)), vec![user]);
}
