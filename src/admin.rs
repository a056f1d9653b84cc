//! Inspection and maintenance commands behind the `tapeq` binary.
//!
//! Every command writes to a caller-supplied writer so the binary and tests
//! share the same code.

use std::io::Write;

use crate::gc::GcOutcome;
use crate::object_store::{AgentCollectionReport, ObjectStore};
use crate::queue_stats::JobsSummary;

/// Format a timestamp in milliseconds to a human-readable string
fn format_timestamp_ms(ms: i64) -> String {
    format!("{} ({}ms)", ms / 1000, ms)
}

fn describe_outcome(outcome: &GcOutcome) -> String {
    match outcome {
        GcOutcome::NotOwned { owner } => format!("not owned (owner {owner})"),
        GcOutcome::Relinked { owner } => format!("relinked to {owner}"),
        GcOutcome::Removed => "removed".to_string(),
        GcOutcome::Requeued { queue, copy_nb } => format!("requeued copy {copy_nb} on {queue}"),
        GcOutcome::Skipped { kind } => format!("skipped ({kind})"),
    }
}

/// Print the root entry's queue pointers, drive register and agents.
pub async fn dump_root<W: Write>(store: &ObjectStore, out: &mut W, json: bool) -> anyhow::Result<()> {
    let root = store.fetch_root_entry().await?;
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(root.payload())?)?;
        return Ok(());
    }
    writeln!(out, "Root entry ({})", store.root_address())?;
    writeln!(out, "==========")?;
    writeln!(out, "Archive queues:")?;
    for pointer in root.dump_archive_queues() {
        writeln!(out, "  {:<24}  {}", pointer.name, pointer.address)?;
    }
    writeln!(out, "Retrieve queues:")?;
    for pointer in root.dump_retrieve_queues() {
        writeln!(out, "  {:<24}  {}", pointer.name, pointer.address)?;
    }
    writeln!(
        out,
        "Drive register: {}",
        root.drive_register_address().unwrap_or("-")
    )?;
    writeln!(out, "Agents:")?;
    for agent in root.dump_agents() {
        writeln!(out, "  {agent}")?;
    }
    Ok(())
}

pub async fn list_objects<W: Write>(store: &ObjectStore, out: &mut W, json: bool) -> anyhow::Result<()> {
    let addresses = store.list_objects().await?;
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&addresses)?)?;
    } else {
        for address in addresses {
            writeln!(out, "{address}")?;
        }
    }
    Ok(())
}

/// Print any object as JSON, whatever its kind.
pub async fn dump_object<W: Write>(
    store: &ObjectStore,
    out: &mut W,
    address: &str,
) -> anyhow::Result<()> {
    let object = store.fetch_object(address).await?;
    writeln!(out, "{}", serde_json::to_string_pretty(&object.to_json()?)?)?;
    Ok(())
}

pub async fn dump_drives<W: Write>(store: &ObjectStore, out: &mut W, json: bool) -> anyhow::Result<()> {
    let drives = store.dump_drives().await?;
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&drives)?)?;
        return Ok(());
    }
    writeln!(
        out,
        "{:<20}  {:<12}  {:<16}  {:<10}  {:<10}  Last update",
        "Drive", "Library", "Status", "Mount", "VID"
    )?;
    writeln!(out, "{}", "-".repeat(100))?;
    for drive in &drives {
        writeln!(
            out,
            "{:<20}  {:<12}  {:<16}  {:<10}  {:<10}  {}",
            drive.drive_name,
            drive.logical_library,
            format!("{:?}", drive.status),
            format!("{:?}", drive.mount_type),
            drive.current_vid.as_deref().unwrap_or("-"),
            format_timestamp_ms(drive.last_update_time)
        )?;
    }
    Ok(())
}

fn write_summary<W: Write>(
    out: &mut W,
    label: &str,
    summary: Option<JobsSummary>,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
        return Ok(());
    }
    let Some(summary) = summary else {
        writeln!(out, "{label}: no queue")?;
        return Ok(());
    };
    writeln!(out, "{label}")?;
    writeln!(out, "Files: {}", summary.files)?;
    writeln!(out, "Bytes: {}", summary.bytes)?;
    if summary.files > 0 {
        writeln!(
            out,
            "Oldest job: {}",
            format_timestamp_ms(summary.oldest_job_start_time)
        )?;
        writeln!(
            out,
            "Youngest job: {}",
            format_timestamp_ms(summary.youngest_job_start_time)
        )?;
        writeln!(out, "Priority: {}", summary.priority)?;
        writeln!(out, "Min request age: {}s", summary.min_request_age)?;
        writeln!(out, "Max drives allowed: {}", summary.max_drives_allowed)?;
        for (policy, count) in &summary.mount_policy_counts {
            writeln!(out, "  policy {policy}: {count}")?;
        }
    }
    Ok(())
}

pub async fn archive_queue_summary<W: Write>(
    store: &ObjectStore,
    out: &mut W,
    tapepool: &str,
    json: bool,
) -> anyhow::Result<()> {
    let summary = store.archive_queue_summary(tapepool).await?;
    write_summary(out, &format!("Archive queue {tapepool}"), summary, json)
}

pub async fn retrieve_queue_summary<W: Write>(
    store: &ObjectStore,
    out: &mut W,
    vid: &str,
    json: bool,
) -> anyhow::Result<()> {
    let summary = store.retrieve_queue_summary(vid).await?;
    write_summary(out, &format!("Retrieve queue {vid}"), summary, json)
}

pub async fn stale_agents<W: Write>(store: &ObjectStore, out: &mut W, json: bool) -> anyhow::Result<()> {
    let agents = store.find_stale_agents().await?;
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&agents)?)?;
    } else if agents.is_empty() {
        writeln!(out, "No stale agents")?;
    } else {
        for agent in agents {
            writeln!(out, "{agent}")?;
        }
    }
    Ok(())
}

fn write_report<W: Write>(out: &mut W, report: &AgentCollectionReport) -> anyhow::Result<()> {
    writeln!(out, "Agent {}", report.agent)?;
    for (address, outcome) in &report.collected {
        writeln!(out, "  {:<48}  {}", address, describe_outcome(outcome))?;
    }
    for address in &report.missing {
        writeln!(out, "  {:<48}  missing", address)?;
    }
    for (address, reason) in &report.failures {
        writeln!(out, "  {:<48}  FAILED: {}", address, reason)?;
    }
    writeln!(
        out,
        "  agent {}",
        if report.agent_removed { "removed" } else { "kept" }
    )?;
    Ok(())
}

/// Collect one named agent, or every stale agent when `agent` is `None`.
pub async fn collect<W: Write>(
    store: &ObjectStore,
    out: &mut W,
    agent: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let reports = match agent {
        Some(agent) => vec![store.collect_agent(agent).await?],
        None => store.collect_stale_agents().await?,
    };
    if json {
        let value: Vec<_> = reports
            .iter()
            .map(|r| {
                serde_json::json!({
                    "agent": r.agent,
                    "collected": r.collected.iter().map(|(address, outcome)| {
                        serde_json::json!({ "address": address, "result": outcome })
                    }).collect::<Vec<_>>(),
                    "missing": r.missing,
                    "failures": r.failures.iter().map(|(address, reason)| {
                        serde_json::json!({ "address": address, "error": reason })
                    }).collect::<Vec<_>>(),
                    "agent_removed": r.agent_removed,
                })
            })
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
    } else if reports.is_empty() {
        writeln!(out, "No stale agents")?;
    } else {
        for report in &reports {
            write_report(out, report)?;
        }
    }
    Ok(())
}
