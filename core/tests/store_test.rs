mod common;

use common::TmpTestDir;
use lantern_core::store::MessageStore;
use lantern_core::utils::misc::get_unix_millis_now;

#[tokio::test]
async fn test_messages_and_device_id_survive_reopen() {
    let dir = TmpTestDir::for_test(&test_messages_and_device_id_survive_reopen).unwrap();
    let db = dir.file("lan.db3");

    let device_id;
    let row_id;
    {
        let store = MessageStore::open(&db).unwrap();
        device_id = store.ensure_device_id().unwrap();
        row_id = store
            .create_message(&device_id, None, "hello group", Some(get_unix_millis_now()))
            .unwrap();
    }

    let store = MessageStore::open(&db).unwrap();
    assert_eq!(store.ensure_device_id().unwrap(), device_id);
    let today = store.list_today().unwrap();
    assert_eq!(today.len(), 1);
    assert_eq!(today[0].id, row_id);
    assert_eq!(today[0].text, "hello group");
    assert_eq!(today[0].from_device_id, device_id);
}

#[tokio::test]
async fn test_open_creates_parent_directories() {
    let dir = TmpTestDir::for_test(&test_open_creates_parent_directories).unwrap();
    let db = dir.file("nested/deeper/lan.db3");

    let store = MessageStore::open(&db).unwrap();
    store.set_setting("k", "v").unwrap();
    assert!(db.exists());
}
