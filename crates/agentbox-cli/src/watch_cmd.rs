//! `agentbox watch`: follow the protocol output and status files.
//!
//! Polling-based on purpose: the files are the interface here, and any
//! number of watchers may follow them without coordinating with the
//! writer.

use std::collections::HashSet;

use anyhow::Result;

use agentbox_protocol::{OutputFile, OutputRecord, StatusStore};

use crate::config::Settings;

pub async fn run_watch(
    settings: &Settings,
    last: Option<usize>,
    id: Option<&str>,
    status_only: bool,
    verbose: bool,
) -> Result<()> {
    let output = OutputFile::new(settings.protocol.output_path());
    let status = StatusStore::new(settings.protocol.status_path());

    if status_only {
        let record = status.read_or_idle().await?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    if let Some(id) = id {
        match output.find(id).await? {
            Some(record) => print_response(&record, verbose),
            None => println!("No output found for ID: {id}"),
        }
        return Ok(());
    }

    if let Some(n) = last {
        let records = output.read_all().await?;
        let start = records.len().saturating_sub(n);
        for record in &records[start..] {
            print_response(record, verbose);
        }
        return Ok(());
    }

    watch_loop(settings, &output, &status, verbose).await
}

/// Poll for new output records and status transitions until ctrl-c.
async fn watch_loop(
    settings: &Settings,
    output: &OutputFile,
    status: &StatusStore,
    verbose: bool,
) -> Result<()> {
    println!(
        "Watching {} for output...",
        settings.protocol.output_path().display()
    );
    println!("Press Ctrl+C to stop\n");

    let mut seen: HashSet<String> = HashSet::new();
    let mut last_status = String::new();

    loop {
        let record = status.read_or_idle().await?;
        let status_line = format!(
            "{} - {}",
            record.state,
            record.detail.as_deref().unwrap_or("")
        );
        if status_line != last_status {
            println!("[STATUS] {status_line}");
            last_status = status_line;
        }

        for record in output.read_all().await? {
            if seen.insert(record.id.clone()) {
                print_response(&record, verbose);
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopped watching");
                return Ok(());
            }
            _ = tokio::time::sleep(settings.protocol.poll_interval) => {}
        }
    }
}

fn print_response(record: &OutputRecord, verbose: bool) {
    println!("\n{}", "=".repeat(60));
    println!(
        "ID: {} | State: {} | Exit: {:?} | {}",
        record.id,
        record.effective_state(),
        record.exit_code,
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
    );
    if verbose {
        let prompt: String = record.prompt.chars().take(200).collect();
        println!("Prompt: {prompt}");
    }
    println!("{}", "-".repeat(60));
    if record.response.is_empty() {
        println!("(no response)");
    } else {
        println!("{}", record.response);
    }
    println!("{}", "=".repeat(60));
}
