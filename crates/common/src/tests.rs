use super::*;

#[test]
fn invalid_page_id_sentinel() {
    assert!(!PageId::INVALID.is_valid());
    assert!(PageId(0).is_valid());
    assert!(!PageId(-7).is_valid());
}

#[test]
fn row_id_display_and_validity() {
    let rid = RowId::new(PageId(3), 12);
    assert!(rid.is_valid());
    assert_eq!(format!("{rid}"), "(3, 12)");
    assert!(!RowId::INVALID.is_valid());
}

#[test]
fn config_builder_defaults() {
    let config = Config::builder().build();
    assert_eq!(config.buffer_pool_pages, 256);
    assert_eq!(config.replacer, ReplacerPolicy::Lru);

    let clock = Config::builder()
        .buffer_pool_pages(8)
        .replacer(ReplacerPolicy::Clock)
        .build();
    assert_eq!(clock.buffer_pool_pages, 8);
    assert_eq!(clock.replacer, ReplacerPolicy::Clock);
}

#[test]
fn config_serde_round_trip() {
    let config = Config::builder().buffer_pool_pages(32).build();
    let json = serde_json::to_string(&config).unwrap();
    let back: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(back.buffer_pool_pages, 32);
    assert_eq!(back.data_dir, config.data_dir);
}

#[test]
fn errors_format_with_context() {
    let err = DbError::SlotNotFound {
        page_id: PageId(4),
        slot: 9,
    };
    assert_eq!(format!("{err}"), "slot 9 does not exist on page 4");
    assert!(format!("{}", DbError::AllPinned).contains("pinned"));
}
