mod test_helpers;

use tapeq::admin;
use tapeq::drive_register::{DriveStatus, DriveStatusReport};
use test_helpers::*;

fn output(buf: Vec<u8>) -> String {
    String::from_utf8(buf).unwrap()
}

#[tapeq::test]
async fn dump_root_lists_queues_and_agents() {
    let (_tmp, store) = open_temp_store().await;
    store
        .queue_retrieve_request(scheduler_request(1), criteria(1, &[("V00042", 1)]))
        .await
        .unwrap();

    let mut out = Vec::new();
    admin::dump_root(&store, &mut out, false).await.unwrap();
    let text = output(out);
    assert!(text.contains("Retrieve queues:"));
    assert!(text.contains("V00042"));
    assert!(text.contains(store.agent_address()));
    assert!(text.contains("Drive register: -"));

    let mut out = Vec::new();
    admin::dump_root(&store, &mut out, true).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(json["retrieve_queues"][0]["name"], "V00042");
}

#[tapeq::test]
async fn queue_summary_prints_counts() {
    let (_tmp, store) = open_temp_store().await;
    store
        .queue_retrieve_request(scheduler_request(1), criteria(1, &[("V1", 1)]))
        .await
        .unwrap();

    let mut out = Vec::new();
    admin::retrieve_queue_summary(&store, &mut out, "V1", false)
        .await
        .unwrap();
    let text = output(out);
    assert!(text.contains("Files: 1"));
    assert!(text.contains("Bytes: 1000"));
    assert!(text.contains("policy default: 1"));

    let mut out = Vec::new();
    admin::archive_queue_summary(&store, &mut out, "pool9", false)
        .await
        .unwrap();
    assert!(output(out).contains("no queue"));

    let mut out = Vec::new();
    admin::retrieve_queue_summary(&store, &mut out, "V1", true)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(json["files"], 1);
}

#[tapeq::test]
async fn drives_and_objects_are_listed() {
    let (_tmp, store) = open_temp_store().await;
    store.add_drive("drive0", "lib0", entry_log(1)).await.unwrap();
    store
        .report_drive_status(&DriveStatusReport::new("drive0", DriveStatus::Up, 2))
        .await
        .unwrap();

    let mut out = Vec::new();
    admin::dump_drives(&store, &mut out, false).await.unwrap();
    let text = output(out);
    assert!(text.contains("drive0"));
    assert!(text.contains("Up"));

    let mut out = Vec::new();
    admin::list_objects(&store, &mut out, true).await.unwrap();
    let listed: Vec<String> = serde_json::from_slice(&out).unwrap();
    assert!(listed.iter().any(|a| a.starts_with("DriveRegister-")));

    let mut out = Vec::new();
    admin::dump_object(&store, &mut out, store.root_address())
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(json["kind"], "RootEntry");
}

#[tapeq::test]
async fn collect_reports_per_object_outcomes() {
    let (_tmp, backend) = open_temp_backend().await;
    let dead = attach_agent(&backend, "dead").await;
    let dead_address = dead.agent_address().to_string();
    drop(dead);

    let store = attach_agent(&backend, "admin").await;
    let mut out = Vec::new();
    admin::collect(&store, &mut out, Some(&dead_address), false)
        .await
        .unwrap();
    let text = output(out);
    assert!(text.contains(&dead_address));
    assert!(text.contains("agent removed"));

    let mut out = Vec::new();
    admin::stale_agents(&store, &mut out, false).await.unwrap();
    assert!(output(out).contains("No stale agents"));
}
