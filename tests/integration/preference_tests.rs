//! AsyncPreference + PersistenceWriter against the mock store.

use std::time::{Duration, Instant};

use blerpc::prefs::{AsyncPreference, PersistenceWriter, TextBuf};

use super::mock_kv::{ManualClock, MockKv};

#[test]
fn writer_persists_only_after_period() {
    let kv = MockKv::new();
    let clock = ManualClock::default();
    let (mut pref, persister) = AsyncPreference::new(kv.clone(), "settings", "level", 3u32);
    let mut writer = PersistenceWriter::new(200).with_clock(clock.clone());
    writer.add(persister);

    pref.set(7);
    clock.set(150);
    assert!(!writer.tick());
    assert_eq!(kv.writes(), 0);

    clock.set(200);
    assert!(writer.tick());
    assert_eq!(kv.get("settings", "level"), Some(7u32.to_le_bytes().to_vec()));
}

#[test]
fn unchanged_value_is_not_rewritten() {
    let kv = MockKv::new();
    let (mut pref, persister) = AsyncPreference::new(kv.clone(), "settings", "level", 0u32);
    let mut writer = PersistenceWriter::new(200);
    writer.add(persister);

    pref.set(1);
    writer.tick();
    writer.tick();
    writer.tick();
    assert_eq!(kv.writes(), 1);
}

#[test]
fn only_latest_value_reaches_storage() {
    let kv = MockKv::new();
    let (mut pref, persister) = AsyncPreference::new(kv.clone(), "settings", "level", 0u32);
    let mut writer = PersistenceWriter::new(200);
    writer.add(persister);

    for v in 1..=10u32 {
        pref.set(v);
    }
    writer.tick();
    assert_eq!(kv.writes(), 1);
    assert_eq!(kv.get("settings", "level"), Some(10u32.to_le_bytes().to_vec()));
}

#[test]
fn failed_write_is_retried() {
    let kv = MockKv::new();
    let (mut pref, persister) = AsyncPreference::new(kv.clone(), "settings", "level", 0u32);
    let mut writer = PersistenceWriter::new(200);
    writer.add(persister);

    kv.set_failing(true);
    pref.set(5);
    writer.tick();
    assert_eq!(kv.get("settings", "level"), None);

    kv.set_failing(false);
    writer.tick();
    assert_eq!(kv.get("settings", "level"), Some(5u32.to_le_bytes().to_vec()));
}

#[test]
fn stored_value_wins_over_default_on_first_get() {
    let kv = MockKv::new();
    kv.put("settings", "name", b"Bench");
    let (mut pref, _) =
        AsyncPreference::new(kv.clone(), "settings", "name", TextBuf::<32>::new());
    assert!(!pref.is_loaded());
    assert_eq!(pref.get().as_str(), "Bench");
    assert!(pref.is_loaded());
}

#[test]
fn wrong_length_blob_falls_back_to_default() {
    let kv = MockKv::new();
    kv.put("settings", "level", &[1, 2, 3]);
    let (mut pref, _) = AsyncPreference::new(kv.clone(), "settings", "level", 42u32);
    assert_eq!(*pref.get(), 42);
}

#[test]
fn in_place_update_is_persisted() {
    let kv = MockKv::new();
    let (mut pref, persister) =
        AsyncPreference::new(kv.clone(), "settings", "pair", [0u16; 2]);
    let mut writer = PersistenceWriter::new(200);
    writer.add(persister);
    {
        let mut v = pref.update();
        v[0] = 1;
        v[1] = 2;
    }
    writer.tick();
    assert_eq!(kv.get("settings", "pair"), Some(vec![1, 0, 2, 0]));
}

#[test]
fn spawned_writer_persists_in_background() {
    let kv = MockKv::new();
    let (mut pref, persister) = AsyncPreference::new(kv.clone(), "settings", "bg", 0u32);
    let mut writer = PersistenceWriter::new(10);
    writer.add(persister);
    let _handle = writer.spawn(Duration::from_millis(1)).unwrap();

    pref.set(99);
    let deadline = Instant::now() + Duration::from_secs(5);
    while kv.get("settings", "bg").is_none() {
        assert!(Instant::now() < deadline, "background write never happened");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(kv.get("settings", "bg"), Some(99u32.to_le_bytes().to_vec()));
}
