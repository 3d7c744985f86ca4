//! Registry persistence across restarts, against a real JSON file.

use fleetcast_protocol::DeviceId;
use fleetcast_registry::{DeviceRegistry, JsonFileStore, KeyValueStore};
use serde_json::Value;

fn open(path: &std::path::Path) -> DeviceRegistry<JsonFileStore> {
    let store = JsonFileStore::open(path).expect("store should open");
    DeviceRegistry::load(store).expect("registry should load")
}

#[test]
fn test_offline_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");
    let dev0 = DeviceId::new("dev0");

    {
        let mut reg = open(&path);
        reg.bootup(&dev0, "94107", Some("Kitchen"));
        reg.bootup(&DeviceId::new("dev1"), "10001", None);
        reg.offline(&dev0);
    }

    let reg = open(&path);
    assert_eq!(reg.len(), 2);
    let device = reg.get(&dev0).unwrap();
    assert!(!device.active);
    assert_eq!(device.routing_key, "94107");
    assert_eq!(device.name, "Kitchen");
    assert!(device.last_seen.is_some());
    assert_eq!(reg.active_routing_keys(), vec!["10001"]);
}

#[test]
fn test_sticky_key_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");
    let dev0 = DeviceId::new("dev0");

    open(&path).bootup(&dev0, "94107", None);
    let mut reg = open(&path);
    let outcome = reg.bootup(&dev0, "60601", None);

    assert!(!outcome.created);
    assert_eq!(outcome.routing_key, "94107");
}

#[test]
fn test_file_layout_is_keyed_by_device_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");
    open(&path).bootup(&DeviceId::new("dev0"), "94107", None);

    let json: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    let record = &json["dev0"];
    assert_eq!(record["id"], "dev0");
    assert_eq!(record["routingKey"], "94107");
    assert_eq!(record["active"], true);
    assert!(record["lastSeen"].as_str().unwrap().ends_with('Z'));
}

#[test]
fn test_transitions_reach_disk_on_flush() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");
    let mut reg = open(&path);

    reg.bootup(&DeviceId::new("dev0"), "94107", None);
    assert!(!path.exists());

    reg.store().flush().unwrap();
    let json: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(json["dev0"]["routingKey"], "94107");
}

#[test]
fn test_load_tolerates_bad_records_and_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");
    std::fs::write(
        &path,
        br#"{
            "dev0": {"id": "dev0", "name": "A", "routingKey": "1", "active": true, "lastSeen": "not a time"},
            "dev1": {"id": "dev1", "routingKey": "2", "active": false},
            "dev2": {"routingKey": 42}
        }"#,
    )
    .unwrap();

    let reg = open(&path);
    assert_eq!(reg.len(), 2);
    assert_eq!(reg.get(&DeviceId::new("dev0")).unwrap().last_seen, None);
    assert_eq!(reg.get(&DeviceId::new("dev1")).unwrap().name, "dev1");
    assert!(reg.get(&DeviceId::new("dev2")).is_none());
    // Untouched entries stay in the file until overwritten.
    assert!(reg.store().get::<Value>("dev2").unwrap().is_some());
}
