use super::*;
use common::Transaction;
use testsupport::{people_columns, person};
use types::Field;

fn config_for(dir: &tempfile::TempDir) -> Config {
    Config::builder()
        .data_dir(dir.path().to_path_buf())
        .buffer_pool_pages(32)
        .build()
}

#[test]
fn create_insert_reopen_get() {
    let dir = tempfile::tempdir().unwrap();
    let txn = Transaction::default();

    let rid = {
        let mut engine = Engine::new(config_for(&dir)).unwrap();
        engine.create_database("app").unwrap();

        let db = engine.database_mut("app").unwrap();
        db.catalog_mut()
            .create_table("people", people_columns())
            .unwrap();
        let mut row = person(1, "hi", 0.5);
        db.catalog_mut()
            .table_mut("people")
            .unwrap()
            .heap_mut()
            .insert_tuple(&mut row, &txn)
            .unwrap()
    }; // engine drop flushes

    let mut engine = Engine::new(config_for(&dir)).unwrap();
    assert_eq!(engine.names().collect::<Vec<_>>(), vec!["app"]);

    let db = engine.database_mut("app").unwrap();
    let row = db
        .catalog()
        .table("people")
        .unwrap()
        .heap()
        .get_tuple(rid, &txn)
        .unwrap();
    assert_eq!(row.field(0), &Field::Int32(Some(1)));
    assert_eq!(row.field(1), &Field::Char(Some("hi".into())));
}

#[test]
fn sidecar_lists_databases() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut engine = Engine::new(config_for(&dir)).unwrap();
        engine.create_database("alpha").unwrap();
        engine.create_database("beta").unwrap();
    }

    let sidecar = dir.path().join(DB_NAME_FILE);
    let listed: Vec<String> = std::fs::read_to_string(&sidecar)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(listed, vec!["alpha", "beta"]);

    let engine = Engine::new(config_for(&dir)).unwrap();
    assert_eq!(engine.names().collect::<Vec<_>>(), vec!["alpha", "beta"]);
}

#[test]
fn drop_database_removes_file_and_entry() {
    let dir = tempfile::tempdir().unwrap();

    let mut engine = Engine::new(config_for(&dir)).unwrap();
    engine.create_database("gone").unwrap();
    let path = dir.path().join("gone.db");
    assert!(path.exists());

    engine.drop_database("gone").unwrap();
    assert!(!path.exists());
    assert!(engine.database("gone").is_err());
    assert_eq!(engine.names().count(), 0);

    assert!(engine.drop_database("gone").is_err());
}

#[test]
fn duplicate_database_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = Engine::new(config_for(&dir)).unwrap();
    engine.create_database("app").unwrap();
    assert!(engine.create_database("app").is_err());
}

#[test]
fn missing_files_are_skipped_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut engine = Engine::new(config_for(&dir)).unwrap();
        engine.create_database("keep").unwrap();
        engine.create_database("lost").unwrap();
    }
    std::fs::remove_file(dir.path().join("lost.db")).unwrap();

    let engine = Engine::new(config_for(&dir)).unwrap();
    assert_eq!(engine.names().collect::<Vec<_>>(), vec!["keep"]);
}
