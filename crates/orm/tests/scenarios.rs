use kiln_orm::cache::Partition;
use kiln_orm::driver::MockDriver;
use kiln_orm::{Core, Dialect, ErrorKind, Policy, Timestamp, Value, args, entity};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

entity! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct User {
        #[orm("pk;autoinc")]
        pub id: i64,
        #[orm("unique;size:50")]
        pub email: String,
        #[orm("default:false")]
        pub is_admin: bool,
        #[orm("now")]
        pub created_at: Timestamp,
    }
}

entity! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Post {
        #[orm("pk;autoinc")]
        pub id: i64,
        #[orm("fk:users.id:cascade")]
        pub user_id: i64,
        #[orm("size:120")]
        pub title: String,
    }
}

entity! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Sample {
        #[orm("pk;autoinc")]
        pub id: i64,
        pub small: i16,
        pub count: u32,
        pub ratio: f64,
        pub label: String,
        pub flag: bool,
        pub seen_at: Timestamp,
        pub tags: Vec<String>,
        pub note: Option<String>,
        pub score: Option<i64>,
    }
}

/// A core with one file-backed SQLite database named `main`.
async fn sqlite_core() -> (Core, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.sqlite");
    let core = Core::new();
    core.connect("main", Dialect::Sqlite, &format!("sqlite://{}?mode=rwc", path.display()))
        .await
        .unwrap();
    (core, dir)
}

fn mock_core(dialect: Dialect) -> (Core, Arc<MockDriver>) {
    let core = Core::new();
    let driver = Arc::new(MockDriver::new(dialect));
    core.register("main", driver.clone()).unwrap();
    (core, driver)
}

#[tokio::test]
async fn create_and_read_back() {
    let (core, _dir) = sqlite_core().await;
    core.migrate::<User>("main", Policy::Fail).await.unwrap();

    let id = core
        .model::<User>()
        .insert(&User { email: "a@x".into(), ..User::default() })
        .await
        .unwrap();
    assert_eq!(id, 1);

    let users = core.model::<User>().all().await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, 1);
    assert_eq!(users[0].email, "a@x");
    assert!(!users[0].is_admin);
    assert!(users[0].created_at.abs_diff_seconds(&Timestamp::now()) <= 5);
}

#[tokio::test]
async fn update_invalidates_cached_rows() {
    let (core, _dir) = sqlite_core().await;
    core.migrate::<User>("main", Policy::Fail).await.unwrap();
    core.model::<User>()
        .insert(&User { email: "a@x".into(), ..User::default() })
        .await
        .unwrap();

    let before = core.table("users").all().await.unwrap();
    assert_eq!(before[0].get("is_admin"), Some(&Value::Int(0)));
    assert_eq!(core.cache().len(Partition::RowMany), 1);

    let updated = core
        .table("users")
        .filter("email = ?", args!["a@x"])
        .set("is_admin = ?", args![1])
        .await
        .unwrap();
    assert_eq!(updated, 1);
    assert_eq!(core.cache().len(Partition::RowMany), 0);

    let after = core.table("users").all().await.unwrap();
    assert_eq!(after[0].get("is_admin"), Some(&Value::Int(1)));
}

#[tokio::test]
async fn postgres_placeholders_are_numbered() {
    let (core, driver) = mock_core(Dialect::Postgres);
    core.table("t").filter("a=? AND b=?", args![1, 2]).all().await.unwrap();
    let statements = driver.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].sql.contains("a=$1 AND b=$2"));
    assert_eq!(statements[0].args, vec![Value::Int(1), Value::Int(2)]);
}

#[tokio::test]
async fn foreign_key_ddl() {
    let (core, driver) = mock_core(Dialect::Postgres);
    core.migrate::<Post>("main", Policy::Fail).await.unwrap();
    let create = &driver.sql()[0];
    assert!(create.starts_with("CREATE TABLE IF NOT EXISTS posts ("));
    assert!(create.contains("FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE"));
}

#[tokio::test]
async fn set_without_filter_is_refused() {
    let (core, driver) = mock_core(Dialect::Sqlite);
    let err = core.table("users").set("is_admin=?", args![1]).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::MissingWhere));
    let err = core.table("users").delete().await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::MissingWhere));
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn bus_delivers_once_per_subscriber_in_order() {
    let core = Core::new();
    let first = Arc::new(Mutex::new(Vec::new()));
    let second = Arc::new(Mutex::new(Vec::new()));
    for seen in [&first, &second] {
        let seen = Arc::clone(seen);
        core.bus().subscribe("T", move |event: kiln_orm::Event| {
            let seen = Arc::clone(&seen);
            async move { seen.lock().unwrap().push(event.table) }
        });
    }

    for table in ["a", "b", "c", "d"] {
        let receipt = core
            .bus()
            .publish("T", kiln_orm::Event::new(kiln_orm::EventKind::Create, table, "main"))
            .await;
        assert_eq!(receipt.delivered().await, 2);
    }
    assert_eq!(*first.lock().unwrap(), vec!["a", "b", "c", "d"]);
    assert_eq!(*second.lock().unwrap(), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn migration_is_idempotent() {
    let (core, _dir) = sqlite_core().await;
    let first = core.migrate::<User>("main", Policy::Fail).await.unwrap();
    let second = core.migrate::<User>("main", Policy::Fail).await.unwrap();
    assert!(first.applied.is_empty());
    assert!(second.applied.is_empty());
    assert!(second.declined.is_empty());
    assert_eq!(core.list_tables("main").await.unwrap(), vec!["users"]);
}

#[tokio::test]
async fn mutations_evict_typed_reads() {
    let (core, _dir) = sqlite_core().await;
    core.migrate::<User>("main", Policy::Fail).await.unwrap();
    core.model::<User>()
        .insert(&User { email: "a@x".into(), ..User::default() })
        .await
        .unwrap();

    let by_email = || core.model::<User>().filter("email = ?", args!["a@x"]);
    assert_eq!(by_email().one().await.unwrap().email, "a@x");
    assert_eq!(core.cache().len(Partition::RecordOne), 1);

    assert_eq!(by_email().delete().await.unwrap(), 1);
    let err = by_email().one().await.unwrap_err();
    assert!(err.is_not_found());
    assert!(core.model::<User>().all().await.unwrap().is_empty());
}

#[tokio::test]
async fn every_field_family_round_trips() {
    let (core, _dir) = sqlite_core().await;
    core.migrate::<Sample>("main", Policy::Fail).await.unwrap();

    let sample = Sample {
        id: 0,
        small: -12,
        count: 4_000_000_000,
        ratio: 2.5,
        label: "hello, world".into(),
        flag: true,
        seen_at: Timestamp::parse("2024-02-29 13:45:07").unwrap(),
        tags: vec!["red".into(), "blue".into()],
        note: Some("kept".into()),
        score: None,
    };
    let id = core.model::<Sample>().insert(&sample).await.unwrap();
    let read = core.model::<Sample>().filter("id = ?", args![id]).one().await.unwrap();
    assert_eq!(read, Sample { id, ..sample });
}

#[tokio::test]
async fn projection_leaves_other_fields_zero() {
    let (core, _dir) = sqlite_core().await;
    core.migrate::<User>("main", Policy::Fail).await.unwrap();
    core.model::<User>()
        .insert(&User { email: "a@x".into(), is_admin: true, ..User::default() })
        .await
        .unwrap();

    let users = core.model::<User>().select(["email"]).all().await.unwrap();
    assert_eq!(users, vec![User { email: "a@x".into(), ..User::default() }]);
}

#[tokio::test]
async fn order_and_pagination_text() {
    let (core, driver) = mock_core(Dialect::MySql);
    core.table("users").order_by(["+x", "-y", "z"]).all().await.unwrap();
    core.table("users").limit(10).page(3).all().await.unwrap();
    core.table("users").limit(10).page(1).all().await.unwrap();
    assert_eq!(
        driver.sql(),
        vec![
            "SELECT * FROM users ORDER BY x ASC,y DESC,z ASC",
            "SELECT * FROM users LIMIT 10 OFFSET 20",
            "SELECT * FROM users LIMIT 10",
        ]
    );
}

#[tokio::test]
async fn reads_target_the_named_database() {
    let (core, main) = mock_core(Dialect::Sqlite);
    let audit = Arc::new(MockDriver::new(Dialect::Postgres));
    core.register("audit", audit.clone()).unwrap();

    core.table("events").database("audit").filter("id = ?", args![7]).all().await.unwrap();
    assert!(main.statements().is_empty());
    assert_eq!(audit.sql(), vec!["SELECT * FROM events WHERE id = $1"]);

    let err = core.table("events").database("nope").all().await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::UnknownDatabase(name) if name == "nope"));
}

#[tokio::test]
async fn insert_counts_must_match() {
    let (core, driver) = mock_core(Dialect::Sqlite);
    let err = core
        .table("users")
        .insert(["email", "is_admin"], args!["a@x"])
        .await
        .unwrap_err();
    assert!(matches!(&*err, ErrorKind::LengthMismatch { columns: 2, values: 1 }));
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn postgres_insert_returns_primary_key() {
    let (core, driver) = mock_core(Dialect::Postgres);
    core.migrate::<User>("main", Policy::Fail).await.unwrap();
    driver.clear();

    let mut returned = kiln_orm::Row::new();
    returned.push("id", 42i64);
    driver.push_rows(vec![returned]);
    let id = core
        .model::<User>()
        .insert(&User { email: "a@x".into(), ..User::default() })
        .await
        .unwrap();
    assert_eq!(id, 42);
    assert_eq!(driver.sql(), vec!["INSERT INTO users (email) VALUES ($1) RETURNING id"]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_statement_is_abandoned() {
    let (core, driver) = mock_core(Dialect::Sqlite);
    driver.set_latency(Duration::from_secs(30));
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = core.table("users").context(token).all().await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Cancelled));
    assert_eq!(core.cache().len(Partition::RowMany), 0);
}

#[tokio::test]
async fn driver_errors_surface_verbatim() {
    let (core, _dir) = sqlite_core().await;
    let err = core.table("missing").all().await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Driver(message) if message.contains("no such table")));
}

#[tokio::test(start_paused = true)]
async fn read_racing_a_write_is_not_cached() {
    let (core, driver) = mock_core(Dialect::Sqlite);
    driver.set_latency(Duration::from_millis(200));
    let reader = {
        let core = core.clone();
        tokio::spawn(async move { core.table("users").all().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    driver.set_latency(Duration::ZERO);

    let updated = core
        .table("users")
        .filter("id = ?", args![1])
        .set("is_admin = ?", args![1])
        .await
        .unwrap();
    assert_eq!(updated, 1);
    reader.await.unwrap().unwrap();
    assert_eq!(core.cache().len(Partition::RowMany), 0);

    driver.clear();
    core.table("users").all().await.unwrap();
    assert_eq!(driver.sql(), vec!["SELECT * FROM users"]);
    assert_eq!(core.cache().len(Partition::RowMany), 1);
}
