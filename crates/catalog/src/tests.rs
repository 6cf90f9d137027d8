use super::*;
use buffer::BufferPoolManager;
use common::{ReplacerPolicy, RowId, Transaction};
use disk::DiskManager;
use testsupport::prelude::*;
use types::Field;

fn bootstrap(pool: &Arc<BufferPoolManager>) -> CatalogManager {
    CatalogManager::bootstrap(Arc::clone(pool)).unwrap()
}

#[test]
fn create_and_lookup_table() {
    test_pool!(pool);
    let mut catalog = bootstrap(&pool);

    let table_id = catalog.create_table("people", people_columns()).unwrap();
    assert_eq!(table_id, TableId(1));

    let table = catalog.table("people").unwrap();
    assert_eq!(table.name(), "people");
    assert_eq!(table.schema().column_index("name"), Some(1));
    assert_eq!(catalog.table_by_id(table_id).unwrap().name(), "people");
    assert!(matches!(
        catalog.table("missing"),
        Err(DbError::TableNotExists(_))
    ));
}

#[test]
fn duplicate_tables_and_columns_are_rejected() {
    test_pool!(pool);
    let mut catalog = bootstrap(&pool);

    catalog.create_table("people", people_columns()).unwrap();
    assert!(matches!(
        catalog.create_table("people", people_columns()),
        Err(DbError::TableAlreadyExists(_))
    ));

    let dup = vec![
        Column::new("id", types::TypeId::Int32, false, false),
        Column::new("id", types::TypeId::Int32, false, false),
    ];
    assert!(catalog.create_table("bad", dup).is_err());
}

#[test]
fn unique_columns_get_implicit_indexes() {
    test_pool!(pool);
    let mut catalog = bootstrap(&pool);

    catalog.create_table("people", people_columns()).unwrap();

    let indexes = catalog.table_indexes("people").unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].name(), "unique_index_people_id");
    assert_eq!(indexes[0].key_ordinals(), &[0]);

    // The implicit index enforces uniqueness through the tree.
    let txn = Transaction::default();
    let mut row_a = person(1, "ada", 1.0);
    let rid_a = catalog
        .table_mut("people")
        .unwrap()
        .heap_mut()
        .insert_tuple(&mut row_a, &txn)
        .unwrap();

    let index = catalog
        .index_mut("people", "unique_index_people_id")
        .unwrap();
    let key_a = index.key_from_row(&row_a).unwrap();
    index.tree_mut().insert(&key_a, rid_a).unwrap();

    let row_b = person(1, "impostor", 2.0);
    let key_b = index.key_from_row(&row_b).unwrap();
    assert!(matches!(
        index.tree_mut().insert(&key_b, RowId::new(PageId(9), 9)),
        Err(DbError::DuplicateKey)
    ));
}

#[test]
fn create_index_validates_inputs() {
    test_pool!(pool);
    let mut catalog = bootstrap(&pool);
    catalog.create_table("people", people_columns()).unwrap();

    assert!(matches!(
        catalog.create_index("nope", "idx", &["id"]),
        Err(DbError::TableNotExists(_))
    ));
    assert!(matches!(
        catalog.create_index("people", "idx", &["missing"]),
        Err(DbError::ColumnNotExists(_))
    ));

    catalog.create_index("people", "idx_name", &["name"]).unwrap();
    assert!(matches!(
        catalog.create_index("people", "idx_name", &["name"]),
        Err(DbError::IndexAlreadyExists(_))
    ));
}

#[test]
fn drop_index_removes_tree_and_metadata() {
    test_pool!(pool);
    let mut catalog = bootstrap(&pool);
    catalog.create_table("people", people_columns()).unwrap();
    let baseline = pool.disk().num_allocated();

    catalog.create_index("people", "idx_name", &["name"]).unwrap();
    let txn = Transaction::default();
    let mut row = person(1, "ada", 1.0);
    let rid = catalog
        .table_mut("people")
        .unwrap()
        .heap_mut()
        .insert_tuple(&mut row, &txn)
        .unwrap();
    let index = catalog.index_mut("people", "idx_name").unwrap();
    let key = index.key_from_row(&row).unwrap();
    index.tree_mut().insert(&key, rid).unwrap();

    catalog.drop_index("people", "idx_name").unwrap();
    assert!(matches!(
        catalog.index("people", "idx_name"),
        Err(DbError::IndexNotFound(_))
    ));
    // Tree pages and the metadata page are back on the free bitmap; the
    // heap page the row landed on is the only survivor.
    assert_eq!(pool.disk().num_allocated(), baseline);
}

#[test]
fn drop_table_frees_every_data_page() {
    test_pool!(pool);
    let mut catalog = bootstrap(&pool);
    // Pages 0 and 1 stay allocated for the directories.
    let baseline = pool.disk().num_allocated();
    assert_eq!(baseline, 2);

    catalog.create_table("people", people_columns()).unwrap();
    let txn = Transaction::default();
    for i in 0..2500 {
        let mut row = person(i, "somebody", i as f32);
        let rid = catalog
            .table_mut("people")
            .unwrap()
            .heap_mut()
            .insert_tuple(&mut row, &txn)
            .unwrap();
        let index = catalog
            .index_mut("people", "unique_index_people_id")
            .unwrap();
        let key = index.key_from_row(&row).unwrap();
        index.tree_mut().insert(&key, rid).unwrap();
    }
    assert!(pool.disk().num_allocated() > baseline);

    catalog.drop_table("people").unwrap();
    assert!(matches!(
        catalog.table("people"),
        Err(DbError::TableNotExists(_))
    ));
    assert_eq!(pool.disk().num_allocated(), baseline);
}

#[test]
fn catalog_reloads_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let txn = Transaction::default();

    let rid = {
        let disk = Arc::new(DiskManager::open(&path).unwrap());
        let pool = Arc::new(BufferPoolManager::new(disk, 64, ReplacerPolicy::Lru));
        let mut catalog = CatalogManager::bootstrap(Arc::clone(&pool)).unwrap();
        catalog.create_table("people", people_columns()).unwrap();
        catalog.create_index("people", "idx_name", &["name"]).unwrap();

        let mut row = person(7, "grace", 3.25);
        let rid = catalog
            .table_mut("people")
            .unwrap()
            .heap_mut()
            .insert_tuple(&mut row, &txn)
            .unwrap();
        let index = catalog.index_mut("people", "idx_name").unwrap();
        let key = index.key_from_row(&row).unwrap();
        index.tree_mut().insert(&key, rid).unwrap();
        pool.flush_all().unwrap();
        rid
    };

    let disk = Arc::new(DiskManager::open(&path).unwrap());
    let pool = Arc::new(BufferPoolManager::new(disk, 64, ReplacerPolicy::Lru));
    let mut catalog = CatalogManager::open(Arc::clone(&pool)).unwrap();

    let table = catalog.table("people").unwrap();
    assert_eq!(table.table_id(), TableId(1));
    let row = table.heap().get_tuple(rid, &txn).unwrap();
    assert_eq!(row.field(0), &Field::Int32(Some(7)));
    assert_eq!(row.field(1), &Field::Char(Some("grace".into())));

    // Both the implicit and the explicit index come back with their keys.
    let names: Vec<&str> = catalog
        .table_indexes("people")
        .unwrap()
        .iter()
        .map(|i| i.name())
        .collect();
    assert_eq!(names, vec!["unique_index_people_id", "idx_name"]);

    let index = catalog.index_mut("people", "idx_name").unwrap();
    let key = index.key_from_row(&row).unwrap();
    assert_eq!(index.tree().get(&key).unwrap(), Some(rid));
}

#[test]
fn dropped_index_stays_gone_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");

    {
        let disk = Arc::new(DiskManager::open(&path).unwrap());
        let pool = Arc::new(BufferPoolManager::new(disk, 64, ReplacerPolicy::Lru));
        let mut catalog = CatalogManager::bootstrap(Arc::clone(&pool)).unwrap();
        catalog.create_table("people", people_columns()).unwrap();
        catalog.create_index("people", "idx_name", &["name"]).unwrap();
        catalog.create_index("people", "idx_score", &["score"]).unwrap();
        catalog.drop_index("people", "idx_name").unwrap();
        pool.flush_all().unwrap();
    }

    let disk = Arc::new(DiskManager::open(&path).unwrap());
    let pool = Arc::new(BufferPoolManager::new(disk, 64, ReplacerPolicy::Lru));
    let catalog = CatalogManager::open(Arc::clone(&pool)).unwrap();

    let names: Vec<&str> = catalog
        .table_indexes("people")
        .unwrap()
        .iter()
        .map(|i| i.name())
        .collect();
    assert!(names.contains(&"idx_score"));
    assert!(!names.contains(&"idx_name"));
    let surviving = catalog.index("people", "idx_score").unwrap();
    assert_eq!(surviving.key_ordinals(), &[2]);
}

#[test]
fn ids_stay_monotonic_across_drops() {
    test_pool!(pool);
    let mut catalog = bootstrap(&pool);

    let first = catalog
        .create_table("a", vec![Column::new("x", types::TypeId::Int32, false, false)])
        .unwrap();
    catalog.drop_table("a").unwrap();
    let second = catalog
        .create_table("b", vec![Column::new("x", types::TypeId::Int32, false, false)])
        .unwrap();
    assert!(second > first);
}
