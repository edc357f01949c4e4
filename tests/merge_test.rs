//! Integration tests for merging a staging table into a target table.
//!
//! SQLite runs the set-based upsert by default; the per-row strategy is
//! forced through `PoolOptions`. PostgreSQL and MySQL variants run only when
//! `TEST_POSTGRES_URL` / `TEST_MYSQL_URL` are set.

use db_access::config::PoolOptions;
use db_access::db::{ConnectionRegistry, Database, SelectOptions};
use db_access::error::DbError;
use db_access::models::{MergeSpec, MergeStrategy, Record, Value};
use db_access::record;

const CREATE_TABLES: &str = "
    CREATE TABLE merge_target (id INTEGER PRIMARY KEY, name TEXT NOT NULL, value INTEGER);
    CREATE TABLE merge_source (id INTEGER PRIMARY KEY, name TEXT, value INTEGER);
";

async fn setup(strategy: Option<MergeStrategy>) -> (ConnectionRegistry, Database) {
    let registry = ConnectionRegistry::new();
    let mut options = PoolOptions::new();
    if let Some(strategy) = strategy {
        options = options.with_merge_strategy(strategy);
    }
    let db = Database::connect_with(&registry, "sqlite::memory:", options)
        .await
        .unwrap();
    db.run_script(CREATE_TABLES).await.unwrap();
    (registry, db)
}

async fn target_rows(db: &Database) -> Vec<Record> {
    db.select("merge_target", &SelectOptions::new().order_by("id"))
        .await
        .unwrap()
}

async fn seed_alice_bob_charlie(db: &Database) {
    db.insert(
        "merge_target",
        &[
            record! { "id" => 1, "name" => "Alice", "value" => 10 },
            record! { "id" => 2, "name" => "Bob", "value" => 20 },
        ],
    )
    .await
    .unwrap();
    db.insert(
        "merge_source",
        &[
            record! { "id" => 2, "name" => "Bob", "value" => 25 },
            record! { "id" => 3, "name" => "Charlie", "value" => 30 },
        ],
    )
    .await
    .unwrap();
}

fn expected_after_merge() -> Vec<Record> {
    vec![
        record! { "id" => 1, "name" => "Alice", "value" => 10 },
        record! { "id" => 2, "name" => "Bob", "value" => 25 },
        record! { "id" => 3, "name" => "Charlie", "value" => 30 },
    ]
}

#[tokio::test]
async fn test_merge_inserts_new_and_updates_matching_rows() {
    let (_registry, db) = setup(None).await;
    seed_alice_bob_charlie(&db).await;

    let outcome = db
        .merge(&MergeSpec::new("merge_source", "merge_target"))
        .await
        .unwrap();
    assert_eq!(outcome.strategy, MergeStrategy::EmulatedSetUpsert);
    assert_eq!(outcome.rows_affected, 2);
    assert_eq!(target_rows(&db).await, expected_after_merge());
}

#[tokio::test]
async fn test_row_upsert_strategy_gives_same_result() {
    let (_registry, db) = setup(Some(MergeStrategy::EmulatedRowUpsert)).await;
    seed_alice_bob_charlie(&db).await;

    let outcome = db
        .merge(&MergeSpec::new("merge_source", "merge_target"))
        .await
        .unwrap();
    assert_eq!(outcome.strategy, MergeStrategy::EmulatedRowUpsert);
    assert_eq!(target_rows(&db).await, expected_after_merge());
}

#[tokio::test]
async fn test_native_merge_rejected_on_sqlite() {
    let registry = ConnectionRegistry::new();
    let err = Database::connect_with(
        &registry,
        "sqlite::memory:",
        PoolOptions::new().with_merge_strategy(MergeStrategy::NativeMerge),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DbError::Query { .. }));
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_merge_with_update_columns_only_rewrites_those() {
    for strategy in [MergeStrategy::EmulatedSetUpsert, MergeStrategy::EmulatedRowUpsert] {
        let (_registry, db) = setup(Some(strategy)).await;
        db.insert_one(
            "merge_target",
            record! { "id" => 1, "name" => "Alice", "value" => 100 },
        )
        .await
        .unwrap();
        db.insert_one(
            "merge_source",
            record! { "id" => 1, "name" => "Alicia", "value" => 200 },
        )
        .await
        .unwrap();

        db.merge(&MergeSpec::new("merge_source", "merge_target").with_update_columns(["name"]))
            .await
            .unwrap();
        assert_eq!(
            target_rows(&db).await,
            vec![record! { "id" => 1, "name" => "Alicia", "value" => 100 }],
            "strategy {}",
            strategy
        );
    }
}

#[tokio::test]
async fn test_merge_is_idempotent() {
    let (_registry, db) = setup(None).await;
    seed_alice_bob_charlie(&db).await;
    let spec = MergeSpec::new("merge_source", "merge_target");

    db.merge(&spec).await.unwrap();
    let after_first = target_rows(&db).await;
    db.merge(&spec).await.unwrap();
    let after_second = target_rows(&db).await;

    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn test_merge_result_independent_of_source_order() {
    let (_registry, db) = setup(Some(MergeStrategy::EmulatedRowUpsert)).await;
    db.insert(
        "merge_target",
        &[
            record! { "id" => 1, "name" => "Alice", "value" => 10 },
            record! { "id" => 2, "name" => "Bob", "value" => 20 },
        ],
    )
    .await
    .unwrap();
    // Reverse key order in the staging table
    db.insert_one("merge_source", record! { "id" => 3, "name" => "Charlie", "value" => 30 })
        .await
        .unwrap();
    db.insert_one("merge_source", record! { "id" => 2, "name" => "Bob", "value" => 25 })
        .await
        .unwrap();

    db.merge(&MergeSpec::new("merge_source", "merge_target"))
        .await
        .unwrap();
    assert_eq!(target_rows(&db).await, expected_after_merge());
}

#[tokio::test]
async fn test_merge_without_primary_key_fails_before_dml() {
    let registry = ConnectionRegistry::new();
    let db = Database::connect(&registry, "sqlite::memory:").await.unwrap();
    db.run_script(
        "CREATE TABLE nopk_target (id INTEGER, name TEXT, value INTEGER);
         CREATE TABLE nopk_source (id INTEGER, name TEXT, value INTEGER);
         INSERT INTO nopk_target VALUES (1, 'Alice', 10);
         INSERT INTO nopk_source VALUES (1, 'Alicia', 99);",
    )
    .await
    .unwrap();

    let err = db
        .merge(&MergeSpec::new("nopk_source", "nopk_target"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Schema { .. }));

    let rows = db
        .select("nopk_target", &SelectOptions::new())
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![record! { "id" => 1, "name" => "Alice", "value" => 10 }]
    );
}

#[tokio::test]
async fn test_merge_with_explicit_keys_on_unique_column() {
    let registry = ConnectionRegistry::new();
    let db = Database::connect(&registry, "sqlite::memory:").await.unwrap();
    db.run_script(
        "CREATE TABLE users (email TEXT UNIQUE, name TEXT);
         CREATE TABLE users_staging (email TEXT, name TEXT);
         INSERT INTO users VALUES ('a@example.com', 'A');
         INSERT INTO users_staging VALUES ('a@example.com', 'Alpha'), ('b@example.com', 'B');",
    )
    .await
    .unwrap();

    db.merge(&MergeSpec::new("users_staging", "users").with_keys(["email"]))
        .await
        .unwrap();

    let rows = db
        .select("users", &SelectOptions::new().order_by("email"))
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![
            record! { "email" => "a@example.com", "name" => "Alpha" },
            record! { "email" => "b@example.com", "name" => "B" },
        ]
    );
}

#[tokio::test]
async fn test_merge_nonexistent_table_is_schema_error() {
    let (_registry, db) = setup(None).await;
    let err = db
        .merge(&MergeSpec::new("merge_source", "no_such_target"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Schema { .. }));

    let err = db
        .merge(&MergeSpec::new("no_such_source", "merge_target"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Schema { .. }));
}

#[tokio::test]
async fn test_merge_unknown_update_column_is_query_error() {
    let (_registry, db) = setup(None).await;
    let err = db
        .merge(&MergeSpec::new("merge_source", "merge_target").with_update_columns(["price"]))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Query { .. }));
}

#[tokio::test]
async fn test_failed_merge_leaves_target_untouched() {
    for strategy in [MergeStrategy::EmulatedSetUpsert, MergeStrategy::EmulatedRowUpsert] {
        let (_registry, db) = setup(Some(strategy)).await;
        db.insert(
            "merge_target",
            &[
                record! { "id" => 1, "name" => "Alice", "value" => 10 },
                record! { "id" => 2, "name" => "Bob", "value" => 20 },
            ],
        )
        .await
        .unwrap();
        // id 2 applies first, then id 3 violates NOT NULL on merge_target.name
        db.insert(
            "merge_source",
            &[
                record! { "id" => 2, "name" => "Bob", "value" => 25 },
                record! { "id" => 3, "name" => Value::Null, "value" => 30 },
            ],
        )
        .await
        .unwrap();
        let before = target_rows(&db).await;

        let err = db
            .merge(&MergeSpec::new("merge_source", "merge_target"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Statement { .. }), "strategy {}", strategy);
        assert_eq!(target_rows(&db).await, before, "strategy {}", strategy);
    }
}

#[tokio::test]
async fn test_merge_in_explicit_scope_with_other_writes() {
    let (_registry, db) = setup(None).await;
    seed_alice_bob_charlie(&db).await;

    let mut scope = db.begin().await.unwrap();
    let outcome = scope
        .merge(&MergeSpec::new("merge_source", "merge_target"))
        .await
        .unwrap();
    assert_eq!(outcome.rows_affected, 2);
    scope
        .delete("merge_source", &db_access::models::Predicate::new())
        .await
        .unwrap();
    scope.commit().await.unwrap();

    assert_eq!(target_rows(&db).await, expected_after_merge());
    let staged = db
        .select("merge_source", &SelectOptions::new())
        .await
        .unwrap();
    assert!(staged.is_empty());
}

#[tokio::test]
async fn test_strategies_store_source_values_verbatim() {
    let mut stored = Vec::new();
    for strategy in [MergeStrategy::EmulatedSetUpsert, MergeStrategy::EmulatedRowUpsert] {
        let registry = ConnectionRegistry::new();
        let options = PoolOptions::new().with_merge_strategy(strategy);
        let db = Database::connect_with(&registry, "sqlite::memory:", options)
            .await
            .unwrap();
        db.run_script(
            "CREATE TABLE events (id INTEGER PRIMARY KEY, ts DATETIME, amount NUMERIC);
             CREATE TABLE events_staging (id INTEGER PRIMARY KEY, ts DATETIME, amount NUMERIC);
             INSERT INTO events VALUES (1, '2023-12-31T23:59:59Z', '1.50');
             INSERT INTO events_staging VALUES (1, '2024-01-01T10:00:00Z', '2.50');
             INSERT INTO events_staging VALUES (2, '2024-01-02T08:30:00Z', '3.75');",
        )
        .await
        .unwrap();

        db.merge(&MergeSpec::new("events_staging", "events"))
            .await
            .unwrap();

        // Concatenation yields an untyped expression column, read as stored
        let rows = db
            .fetch_all(
                "SELECT id, ts || '' AS ts_raw, typeof(amount) AS amount_type FROM events ORDER BY id",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(
            rows[0].get("ts_raw"),
            Some(&Value::Text("2024-01-01T10:00:00Z".into()))
        );
        assert_eq!(
            rows[1].get("ts_raw"),
            Some(&Value::Text("2024-01-02T08:30:00Z".into()))
        );
        stored.push(rows);
    }
    assert_eq!(stored[0], stored[1]);
}

// =============================================================================
// Server dialects (skipped unless configured)
// =============================================================================

async fn server_merge_round_trip(url: &str, strategy: MergeStrategy) {
    let registry = ConnectionRegistry::new();
    let options = PoolOptions::new().with_merge_strategy(strategy);
    let db = Database::connect_with(&registry, url, options).await.unwrap();
    assert_eq!(db.target().merge_strategy(), Some(strategy));

    db.run_script(
        "DROP TABLE IF EXISTS dal_merge_target;
         DROP TABLE IF EXISTS dal_merge_source;
         CREATE TABLE dal_merge_target (id INTEGER PRIMARY KEY, name VARCHAR(50), value INTEGER);
         CREATE TABLE dal_merge_source (id INTEGER PRIMARY KEY, name VARCHAR(50), value INTEGER);
         INSERT INTO dal_merge_target VALUES (1, 'Alice', 10), (2, 'Bob', 20);
         INSERT INTO dal_merge_source VALUES (2, 'Bob', 25), (3, 'Charlie', 30);",
    )
    .await
    .unwrap();

    let spec = MergeSpec::new("dal_merge_source", "dal_merge_target");
    db.merge(&spec).await.unwrap();
    db.merge(&spec).await.unwrap();

    let rows = db
        .select("dal_merge_target", &SelectOptions::new().order_by("id"))
        .await
        .unwrap();
    let values: Vec<i64> = rows
        .iter()
        .map(|r| r.get("value").and_then(Value::as_i64).unwrap())
        .collect();
    assert_eq!(values, vec![10, 25, 30]);

    db.run_script("DROP TABLE dal_merge_target; DROP TABLE dal_merge_source;")
        .await
        .unwrap();
    registry.close_all().await;
}

#[tokio::test]
async fn test_postgres_merge() {
    let url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            return;
        }
    };
    let registry = ConnectionRegistry::new();
    let preferred = registry.acquire(&url).await.unwrap().merge_strategy().unwrap();
    registry.close_all().await;

    server_merge_round_trip(&url, preferred).await;
    let registry = ConnectionRegistry::new();
    let target = registry.acquire(&url).await.unwrap();
    assert_eq!(target.merge_strategy(), Some(MergeStrategy::EmulatedSetUpsert));
    registry.close_all().await;

    server_merge_round_trip(&url, MergeStrategy::EmulatedSetUpsert).await;
    server_merge_round_trip(&url, MergeStrategy::EmulatedRowUpsert).await;
}

#[tokio::test]
async fn test_mysql_merge() {
    let url = match std::env::var("TEST_MYSQL_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_MYSQL_URL not set");
            return;
        }
    };
    let registry = ConnectionRegistry::new();
    let target = registry.acquire(&url).await.unwrap();
    assert_eq!(target.merge_strategy(), Some(MergeStrategy::EmulatedSetUpsert));
    registry.close_all().await;

    server_merge_round_trip(&url, MergeStrategy::EmulatedSetUpsert).await;
    server_merge_round_trip(&url, MergeStrategy::EmulatedRowUpsert).await;
}
