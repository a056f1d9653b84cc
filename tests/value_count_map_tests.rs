use tapeq::object_store::ObjectStoreError;
use tapeq::value_count_map::{ValueCountMapString, ValueCountMapU64};

#[tapeq::test]
fn counts_accumulate_per_value() {
    let mut map = ValueCountMapU64::new();
    map.inc_count(5u64);
    map.inc_count(5u64);
    map.inc_count(2u64);
    assert_eq!(map.count(5u64), 2);
    assert_eq!(map.count(2u64), 1);
    assert_eq!(map.count(9u64), 0);
    assert_eq!(map.total(), 3);
    assert_eq!(map.get_map(), vec![(2, 1), (5, 2)]);
}

#[tapeq::test]
fn min_and_max_track_removals() {
    let mut map = ValueCountMapU64::new();
    for v in [10u64, 3, 7, 3] {
        map.inc_count(v);
    }
    assert_eq!(map.min_value().unwrap(), 3);
    assert_eq!(map.max_value().unwrap(), 10);

    map.dec_count(10u64).unwrap();
    assert_eq!(map.max_value().unwrap(), 7);

    // one of the two 3s goes; the minimum stays
    map.dec_count(3u64).unwrap();
    assert_eq!(map.min_value().unwrap(), 3);
    map.dec_count(3u64).unwrap();
    assert_eq!(map.min_value().unwrap(), 7);
}

#[tapeq::test]
fn empty_map_has_no_extremes() {
    let mut map = ValueCountMapU64::new();
    assert!(matches!(
        map.min_value(),
        Err(ObjectStoreError::EmptyValueCountMap)
    ));
    assert!(matches!(
        map.max_value(),
        Err(ObjectStoreError::EmptyValueCountMap)
    ));

    map.inc_count(1u64);
    map.dec_count(1u64).unwrap();
    assert!(map.is_empty());
    assert!(map.max_value().is_err());
}

#[tapeq::test]
fn decrementing_unknown_value_fails() {
    let mut map = ValueCountMapString::new();
    map.inc_count("default");
    let err = map.dec_count("express").unwrap_err();
    assert!(matches!(err, ObjectStoreError::NotFound(_)));
    assert_eq!(map.count("default"), 1);
}

#[tapeq::test]
fn string_map_orders_names() {
    let mut map = ValueCountMapString::new();
    map.inc_count("repack");
    map.inc_count("default");
    map.inc_count("repack");
    assert_eq!(map.min_value().unwrap(), "default");
    assert_eq!(map.max_value().unwrap(), "repack");
    assert_eq!(
        map.get_map(),
        vec![("default".to_string(), 1), ("repack".to_string(), 2)]
    );

    map.clear();
    assert!(map.is_empty());
    assert_eq!(map.total(), 0);
}
