use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use lanlens::database::{Database, DeviceStore};
use lanlens::models::{Device, DeviceType, MacAddress};
use lanlens::{AppContext, EngineSettings, OutputHook, run_with};

fn make_test_context(db_path: PathBuf) -> (AppContext, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let output_hook: OutputHook = Arc::new(move |line| {
        sink.lock()
            .expect("output lock should not be poisoned")
            .push(line.to_string());
    });

    let context = AppContext::new(EngineSettings::default())
        .with_db_path(db_path)
        .with_output_hook(output_hook);
    (context, lines)
}

fn seed_device(db_path: &PathBuf) {
    let db = Database::new(db_path.clone()).expect("db should initialize");
    let mac = MacAddress::parse("00:11:32:aa:bb:cc").expect("test MAC should parse");
    let mut device = Device::new(mac, "192.168.50.10".to_string(), Utc::now());
    device.hostname = Some("diskstation".to_string());
    device.vendor = Some("Synology Incorporated".to_string());
    device.device_type = DeviceType::Nas;
    device.confidence = 0.8;
    device.smart_score = 40;
    device.user_label = Some("Backups".to_string());
    db.save_device(&device).expect("seed device should persist");
}

fn joined(lines: &Arc<Mutex<Vec<String>>>) -> String {
    lines
        .lock()
        .expect("output lock should not be poisoned")
        .join("\n")
}

#[tokio::test]
async fn help_command_writes_usage_to_output_hook() {
    let dir = tempfile::tempdir().unwrap();
    let (context, lines) = make_test_context(dir.path().join("lanlens.db"));

    run_with(&context, ["lanlens", "--help"])
        .await
        .expect("help command should succeed");

    let output = joined(&lines);
    assert!(output.contains("Usage:"));
    assert!(output.contains("lanlens export --format <json|csv>"));
}

#[tokio::test]
async fn devices_lists_stored_devices_as_offline() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("lanlens.db");
    seed_device(&db_path);

    let (context, lines) = make_test_context(db_path);
    run_with(&context, ["lanlens", "devices"])
        .await
        .expect("devices should succeed");

    let output = joined(&lines);
    assert!(output.contains("192.168.50.10"));
    assert!(output.contains("00:11:32:AA:BB:CC"));
    assert!(output.contains("NAS"));
    assert!(output.contains("offline"));
    assert!(output.contains("Backups"));
}

#[tokio::test]
async fn export_reads_from_context_db_path() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("lanlens.db");
    seed_device(&db_path);

    let (context, lines) = make_test_context(db_path.clone());
    run_with(&context, ["lanlens", "export", "--format", "json"])
        .await
        .expect("json export should succeed");
    let parsed: serde_json::Value =
        serde_json::from_str(&joined(&lines)).expect("export output should be valid JSON");
    assert_eq!(parsed["total_devices"], 1);
    assert_eq!(parsed["online_devices"], 0);
    assert_eq!(parsed["devices"][0]["user_label"], "Backups");

    let (context, lines) = make_test_context(db_path);
    run_with(&context, ["lanlens", "export", "--format=csv"])
        .await
        .expect("csv export should succeed");
    let csv = joined(&lines);
    let mut rows = csv.lines();
    assert!(rows.next().expect("csv header").starts_with("IP Address,MAC Address"));
    let row = rows.next().expect("csv row");
    assert!(row.contains("00:11:32:AA:BB:CC"));
    assert!(row.contains("diskstation"));
}

#[tokio::test]
async fn invalid_arguments_fail_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let (context, lines) = make_test_context(dir.path().join("lanlens.db"));

    let err = run_with(&context, ["lanlens", "export", "--format", "pdf"])
        .await
        .expect_err("pdf export should be rejected");
    assert!(err.to_string().contains("Unsupported export format"));
    assert!(joined(&lines).is_empty());
}
