//! CLI commands implementation

use anyhow::Result;
use std::sync::Arc;
use sweeplet_core::SweepConfig;
use sweeplet_runtime::ProcessRuntime;
use sweeplet_scheduler::{DispatchReport, Dispatcher, FileLock, JobOutcome, JobState};

/// Run one dispatch round
pub async fn run(config: SweepConfig, json: bool) -> Result<()> {
    let dispatcher = Dispatcher::new(config, Arc::new(ProcessRuntime::default()));
    let report = dispatcher.dispatch().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

/// List the jobs of a sweep without touching anything
pub fn plan(config: SweepConfig) -> Result<()> {
    let dispatcher = Dispatcher::new(config, Arc::new(ProcessRuntime::default()));
    let jobs = dispatcher.prepare()?;

    if jobs.is_empty() {
        println!("Sweep expands to no jobs");
        return Ok(());
    }

    println!("{:<10} {:<40} {}", "STATE", "NAME", "ROOT");
    println!("{}", "-".repeat(100));
    for job in &jobs {
        println!(
            "{:<10} {:<40} {}",
            job.state.to_string(),
            job.name,
            job.root.display()
        );
    }

    let finished = jobs.iter().filter(|j| j.state == JobState::Skipped).count();
    println!();
    println!(
        "Runnable: {}, Finished: {}, Total: {}",
        jobs.len() - finished,
        finished,
        jobs.len()
    );

    Ok(())
}

/// Remove stale lock markers from the sweep's lock directory
pub fn clean_lock(config: &SweepConfig) -> Result<()> {
    let removed = FileLock::clear_stale(&config.dispatch.lock_dir)?;
    println!(
        "Removed {} lock marker(s) from {}",
        removed,
        config.dispatch.lock_dir.display()
    );
    Ok(())
}

fn print_report(report: &DispatchReport) {
    println!(
        "Runnable: {}, Finished: {}, Total: {}",
        report.runnable, report.finished, report.total
    );

    if report.debug {
        for command in &report.commands {
            println!("{}", command);
        }
        return;
    }

    if report.outcomes.is_empty() {
        println!("Nothing to run");
        return;
    }

    println!();
    println!("{:<6} {:<40} {:<10} {:<8} {}", "JOB", "NAME", "GPUS", "EXIT", "STATUS");
    println!("{}", "-".repeat(80));
    for outcome in &report.outcomes {
        println!(
            "{:<6} {:<40} {:<10} {:<8} {}",
            outcome.index,
            outcome.name,
            format_resources(outcome),
            outcome
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            status(outcome)
        );
    }

    println!();
    println!(
        "Launched: {}, Failed: {} (run {})",
        report.launched(),
        report.failed(),
        report.run_id
    );
}

fn format_resources(outcome: &JobOutcome) -> String {
    outcome
        .resources
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn status(outcome: &JobOutcome) -> String {
    match (&outcome.error, outcome.success, outcome.marked) {
        (Some(error), _, _) => format!("error: {}", error),
        (None, true, _) => "ok".to_string(),
        (None, false, true) => "failed (marked finished)".to_string(),
        (None, false, false) => "failed (will retry)".to_string(),
    }
}
