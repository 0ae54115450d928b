use super::*;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn create_test_store() -> (SessionStore, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store =
        SessionStore::new(temp_dir.path().join("chat_history")).expect("store should open");
    (store, temp_dir)
}

fn sample_messages() -> Vec<Message> {
    vec![
        Message::user("What color is the fox?"),
        Message::assistant("The fox is brown."),
        Message::user("Ünïcödé and \"quotes\"\nwith newlines"),
    ]
}

fn set_mtime(path: &Path, secs_after_epoch: u64) {
    let file = fs::File::options()
        .write(true)
        .open(path)
        .expect("session file should open");
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs_after_epoch))
        .expect("mtime should update");
}

#[test]
fn creates_history_directory() {
    let (store, _temp_dir) = create_test_store();
    assert!(store.history_dir().is_dir());
}

#[test]
fn save_and_load_round_trip() {
    let (store, _temp_dir) = create_test_store();
    let messages = sample_messages();

    store
        .save_session("20240101_120000", &messages)
        .expect("save should succeed");
    let loaded = store
        .load_session("20240101_120000")
        .expect("load should succeed");

    assert_eq!(loaded, messages);
}

#[test]
fn save_overwrites_previous_state() {
    let (store, _temp_dir) = create_test_store();
    let messages = sample_messages();

    store.save_session("s1", &messages).expect("first save");
    store.save_session("s1", &messages[..1]).expect("second save");

    let loaded = store.load_session("s1").expect("load should succeed");
    assert_eq!(loaded, messages[..1].to_vec());
}

#[test]
fn file_format_is_pretty_role_content_json() {
    let (store, _temp_dir) = create_test_store();
    store
        .save_session("format", &[Message::user("hi")])
        .expect("save should succeed");

    let raw = fs::read_to_string(store.history_dir().join("format.json"))
        .expect("session file should exist");
    assert!(raw.contains("\n  {"), "output should be indented: {}", raw);

    let value: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
    assert_eq!(value[0]["role"], "user");
    assert_eq!(value[0]["content"], "hi");
}

#[test]
fn save_with_empty_id_is_noop() {
    let (store, _temp_dir) = create_test_store();
    store
        .save_session("", &sample_messages())
        .expect("empty id should be ignored");

    assert!(store.list_sessions().expect("list").is_empty());
}

#[test]
fn missing_session_loads_empty() {
    let (store, _temp_dir) = create_test_store();
    let loaded = store
        .load_session("20991231_235959")
        .expect("missing session is not an error");
    assert!(loaded.is_empty());
}

#[test]
fn corrupt_session_is_error() {
    let (store, _temp_dir) = create_test_store();
    fs::write(store.history_dir().join("bad.json"), "{ not a list").expect("write");

    assert!(matches!(
        store.load_session("bad"),
        Err(RagError::Session(_))
    ));
}

#[test]
fn generated_ids_are_distinct() {
    let (store, _temp_dir) = create_test_store();

    let first = store.generate_session_id();
    let second = store.generate_session_id();
    let third = store.generate_session_id();

    assert_ne!(first, second);
    assert_ne!(second, third);
    assert_ne!(first, third);
    for id in [&first, &second, &third] {
        assert!(id.len() >= 15);
        assert_eq!(id.as_bytes()[8], b'_');
    }
}

#[test]
fn generated_id_avoids_existing_files() {
    let (store, _temp_dir) = create_test_store();
    let base = Local::now().format("%Y%m%d_%H%M%S").to_string();
    store
        .save_session(&base, &sample_messages())
        .expect("save should succeed");

    let id = store.generate_session_id();
    assert!(!store.history_dir().join(format!("{}.json", id)).exists());
}

#[test]
fn list_sessions_newest_first() {
    let (store, _temp_dir) = create_test_store();

    for id in ["old", "newest", "middle"] {
        store
            .save_session(id, &sample_messages())
            .expect("save should succeed");
    }
    fs::write(store.history_dir().join("notes.txt"), "ignored").expect("write");

    set_mtime(&store.history_dir().join("old.json"), 1_000);
    set_mtime(&store.history_dir().join("middle.json"), 2_000);
    set_mtime(&store.history_dir().join("newest.json"), 3_000);

    let ids: Vec<String> = store
        .list_sessions()
        .expect("list should succeed")
        .into_iter()
        .map(|s| s.id)
        .collect();

    assert_eq!(ids, vec!["newest", "middle", "old"]);
}

#[test]
fn delete_session_removes_file() {
    let (store, _temp_dir) = create_test_store();
    store
        .save_session("doomed", &sample_messages())
        .expect("save should succeed");

    store.delete_session("doomed").expect("delete should succeed");

    assert!(store.load_session("doomed").expect("load").is_empty());
    assert!(store.list_sessions().expect("list").is_empty());
}

#[test]
fn delete_missing_session_is_noop() {
    let (store, _temp_dir) = create_test_store();
    store
        .save_session("keep", &sample_messages())
        .expect("save should succeed");
    let before = store.list_sessions().expect("list");

    store
        .delete_session("20240101_000000")
        .expect("deleting a missing session is not an error");

    assert_eq!(store.list_sessions().expect("list"), before);
}

#[test]
fn rejects_path_like_ids() {
    let (store, _temp_dir) = create_test_store();

    for id in ["../escape", "a/b", "..", "dir\\file"] {
        assert!(matches!(
            store.save_session(id, &sample_messages()),
            Err(RagError::Session(_))
        ));
        assert!(store.load_session(id).is_err());
        assert!(store.delete_session(id).is_err());
    }
}

#[test]
fn role_serializes_lowercase() {
    let json = serde_json::to_string(&Message::assistant("ok")).expect("serialize");
    assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);

    let parsed: Message =
        serde_json::from_str(r#"{"role":"user","content":"hey"}"#).expect("deserialize");
    assert_eq!(parsed, Message::user("hey"));

    assert!(serde_json::from_str::<Message>(r#"{"role":"system","content":"x"}"#).is_err());
}
