//! Client commands for the query endpoints: status, stop, history.

use anyhow::{Context, Result};

use crate::api::ApiClient;

pub async fn run_status(server: &str) -> Result<()> {
    let client = ApiClient::new(server);
    let status = client.status().await.context("failed to fetch status")?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

pub async fn run_stop(server: &str) -> Result<()> {
    let client = ApiClient::new(server);
    let ack = client.stop().await.context("failed to send stop")?;
    println!("{}", serde_json::to_string_pretty(&ack)?);
    Ok(())
}

pub async fn run_history(server: &str, limit: usize) -> Result<()> {
    let client = ApiClient::new(server);
    let history = client
        .history(limit)
        .await
        .context("failed to fetch history")?;

    let Some(entries) = history["history"].as_array() else {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    };

    if entries.is_empty() {
        println!("No history yet.");
        return Ok(());
    }

    for entry in entries {
        let state = entry["state"].as_str().unwrap_or("?");
        let id = entry["task"]["id"].as_str().unwrap_or("?");
        let prompt = entry["task"]["prompt"].as_str().unwrap_or("");
        let prompt_short: String = prompt.chars().take(50).collect();
        println!(
            "[{state}] {id} - {prompt_short}{} (exit: {})",
            if prompt.chars().count() > 50 { "..." } else { "" },
            entry["exit_code"],
        );
    }
    Ok(())
}
