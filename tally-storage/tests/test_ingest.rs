use similar_asserts::assert_eq;
use tally_common::NumDate;
use tally_storage::{
    CompositeKey, MapKey, MapValue, Module, ModuleMetric, Storage, StorageConfig, StorageError,
    u64decode, u64encode,
};

fn date(value: u32) -> NumDate {
    NumDate::new(value).unwrap()
}

#[test]
fn test_concrete_scenario() {
    tally_test::setup();
    let mut storage = Storage::default();
    let day = date(20200427);

    assert!(storage.insert_date(day));

    let first = storage.insert_keymap(Module::Requests, day, "/index.php");
    assert_eq!((first.key, first.is_new), (1, true));
    let again = storage.insert_keymap(Module::Requests, day, "/index.php");
    assert_eq!((again.key, again.is_new), (1, false));

    assert_eq!(storage.insert_hits(Module::Requests, day, 1, 1, first.ckey), 1);
    assert_eq!(storage.insert_hits(Module::Requests, day, 1, 1, first.ckey), 2);
    assert_eq!(storage.insert_bw(Module::Requests, day, 1, 512, first.ckey), 512);
    assert_eq!(storage.insert_bw(Module::Requests, day, 1, 256, first.ckey), 768);

    assert_eq!(storage.get_hits(Module::Requests, 1), Some(2));
    assert_eq!(storage.get_bw(Module::Requests, 1), Some(768));
}

#[test]
fn test_partition_isolation() {
    let mut storage = Storage::default();
    let (monday, tuesday) = (date(20200427), date(20200428));

    storage.insert_keymap(Module::Browsers, monday, "Chrome");
    let firefox_monday = storage.insert_keymap(Module::Browsers, monday, "Firefox");
    let firefox_tuesday = storage.insert_keymap(Module::Browsers, tuesday, "Firefox");

    assert_eq!(firefox_monday.key, 2);
    assert_eq!(firefox_tuesday.key, 1);
    assert_eq!(firefox_monday.ckey, firefox_tuesday.ckey);

    storage.insert_hits(Module::Browsers, tuesday, 1, 4, firefox_tuesday.ckey);
    storage.invalidate_date(monday).unwrap();

    let partition = storage.partition(tuesday).unwrap();
    assert_eq!(partition.module(Module::Browsers).keymap("Firefox"), Some(1));
    assert_eq!(partition.module(Module::Browsers).hits(1), Some(4));
}

#[test]
fn test_invalidation_completeness() {
    let mut storage = Storage::default();
    let day = date(20200427);

    let key = storage.insert_keymap(Module::Requests, day, "/index.php");
    storage.insert_datamap(Module::Requests, day, key.key, "/index.php", key.ckey);
    storage.insert_hits(Module::Requests, day, key.key, 1, key.ckey);

    storage.invalidate_date(day).unwrap();
    assert!(storage.partition(day).is_none());
    assert!(!storage.sorted_dates().contains(&day));
    assert_eq!(
        storage.invalidate_date(day),
        Err(StorageError::DateNotFound(day))
    );

    storage.rebuild_rawdata_cache();
    assert_eq!(storage.get_hits(Module::Requests, key.ckey), None);
    assert_eq!(storage.get_datamap(Module::Requests, key.ckey), None);
    assert!(storage.parse_raw_data(Module::Requests).is_empty());
}

#[test]
fn test_datamap_round_trip() {
    let mut storage = Storage::default();
    let day = date(20200427);

    let key = storage.insert_keymap(Module::Referrers, day, "https://example.org/");
    storage.insert_datamap(Module::Referrers, day, key.key, "https://example.org/", key.ckey);

    assert_eq!(
        storage.get_datamap(Module::Referrers, key.ckey),
        Some("https://example.org/")
    );
    assert_eq!(storage.size_datamap(Module::Referrers), 1);
}

#[test]
fn test_composite_key_layout() {
    let key = CompositeKey::new(3, 9);
    assert_eq!(key.packed(), u64encode(3, 9));
    assert_eq!(u64decode(key.packed()), (3, 9));
    assert_eq!(format!("{key:?}"), "CompositeKey(3&9)");
}

#[test]
fn test_dynamic_dispatch_through_partition() {
    let mut storage = Storage::default();
    let day = date(20200427);
    storage.insert_date(day);

    let partition = storage.partition_mut(day).unwrap();
    let table = partition.module_mut(Module::StatusCodes);

    table
        .insert(ModuleMetric::DataMap, MapKey::Int(1), MapValue::Str("404".into()))
        .unwrap();
    assert_eq!(table.data_label(1), Some("404"));
    assert!(matches!(
        table.insert(ModuleMetric::DataMap, MapKey::Str("404"), MapValue::Int(1)),
        Err(StorageError::ShapeMismatch { metric: "datamap", .. })
    ));

    assert_eq!(
        table.delete(ModuleMetric::DataMap, MapKey::Int(1)),
        Ok(MapValue::Str("404".into()))
    );
    assert_eq!(table.data_label(1), None);
}

#[test]
fn test_dynamic_keymap_insert_keeps_ids_unique() {
    let mut storage = Storage::default();
    let day = date(20200427);
    storage.insert_date(day);

    storage
        .partition_mut(day)
        .unwrap()
        .module_mut(Module::Requests)
        .insert(ModuleMetric::KeyMap, MapKey::Str("/x"), MapValue::Int(1))
        .unwrap();

    let interned = storage.insert_keymap(Module::Requests, day, "/y");
    assert!(interned.is_new);

    let table = storage.partition(day).unwrap().module(Module::Requests);
    assert_eq!(table.keymap("/x"), Some(1));
    assert_eq!(table.keymap("/y"), Some(2));
}

#[test]
fn test_tailing_with_keep_last() {
    tally_test::setup();
    let mut storage = Storage::new(StorageConfig {
        keep_last: Some(2),
        ..Default::default()
    });

    for (day, path) in [
        (20200427, "/a"),
        (20200428, "/b"),
        (20200429, "/a"),
        (20200429, "/c"),
    ] {
        let day = date(day);
        let key = storage.insert_keymap(Module::Requests, day, path);
        storage.insert_datamap(Module::Requests, day, key.key, path, key.ckey);
        storage.insert_hits(Module::Requests, day, key.key, 1, key.ckey);
        storage.inc_cnt_valid(day, 1);
    }

    assert_eq!(storage.evict_expired(), vec![date(20200427)]);
    assert_eq!(storage.sum_valid(), 3);

    let raw = storage.parse_raw_data(Module::Requests);
    let items: Vec<_> = raw
        .items
        .iter()
        .map(|item| (item.data.as_ref(), item.hits))
        .collect();
    assert_eq!(items, vec![("/b", 1), ("/a", 1), ("/c", 1)]);
}

#[test]
fn test_cost_shrinks_on_invalidation() {
    let mut storage = Storage::default();

    for day in [20200427, 20200428] {
        for i in 0..100 {
            let path = format!("/page/{i}");
            let key = storage.insert_keymap(Module::Requests, date(day), &path);
            storage.insert_datamap(Module::Requests, date(day), key.key, &path, key.ckey);
        }
    }

    let before = storage.cost();
    storage.invalidate_date(date(20200427)).unwrap();
    storage.rebuild_rawdata_cache();
    assert!(storage.cost() < before);
}
