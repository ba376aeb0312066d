use scirocco_db::{create_pool, run_migrations, DbRuntimeSettings};

#[test]
fn db_initialization_creates_message_schema() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let path = dir.path().join("scirocco.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default())
        .expect("failed to create pool");
    let conn = pool.get().expect("failed to get connection");
    let applied = run_migrations(&conn).expect("failed to run migrations");
    assert_eq!(applied, 1);

    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .expect("failed to prepare table query");
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .expect("failed to execute table query")
        .map(|r| r.expect("failed to read table name"))
        .collect();

    assert_eq!(tables, vec!["_scirocco_migrations", "messages"]);
}

#[test]
fn migrations_survive_reopen() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let path = dir.path().join("scirocco.db");
    let path = path.to_str().unwrap();

    {
        let pool = create_pool(path, DbRuntimeSettings::default()).expect("pool");
        let conn = pool.get().expect("conn");
        assert_eq!(run_migrations(&conn).expect("migrate"), 1);
    }

    let pool = create_pool(path, DbRuntimeSettings::default()).expect("pool");
    let conn = pool.get().expect("conn");
    assert_eq!(run_migrations(&conn).expect("migrate again"), 0);
}
