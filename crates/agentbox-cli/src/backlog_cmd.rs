//! `agentbox backlog`: pull pending Linear issues and run them through
//! the agent, one at a time.
//!
//! Retry policy stays here, with the caller: a failed issue is moved
//! back to "Todo" for human attention, never resubmitted automatically.

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use tracing::{info, warn};

use agentbox_linear::{Issue, LinearClient, build_prompt, result_comment, states};

use crate::api::{ApiClient, ApiError};
use crate::config::Settings;
use crate::task_cmd::render_agent_line;

pub struct BacklogArgs {
    pub daemon: bool,
    pub dry_run: bool,
    pub label: Option<String>,
    pub interval: u64,
    pub limit: usize,
}

pub async fn run_backlog(settings: &Settings, server: &str, args: BacklogArgs) -> Result<()> {
    let Some(api_key) = settings.linear_api_key.as_deref() else {
        bail!("LINEAR_API_KEY is not set; get one at https://linear.app/settings/api");
    };
    let linear = LinearClient::new(api_key, settings.linear_team_id.clone())?;
    let api = ApiClient::new(server);

    if args.daemon {
        return daemon_loop(&linear, &api, &args).await;
    }

    let issues = linear
        .pending_issues(args.label.as_deref(), args.limit)
        .await
        .context("failed to fetch pending issues")?;

    if issues.is_empty() {
        println!("No pending issues found");
        return Ok(());
    }

    println!("Found {} pending issues:", issues.len());
    for issue in &issues {
        let title: String = issue.title.chars().take(50).collect();
        println!(
            "  {}: {} [{}]",
            issue.identifier,
            title,
            issue.label_names().join(", ")
        );
    }

    if args.dry_run {
        println!("\n[DRY RUN] Would process first issue");
        return Ok(());
    }

    println!();
    process_issue(&linear, &api, &issues[0]).await?;
    Ok(())
}

/// Keep polling for issues and process them as they appear.
async fn daemon_loop(linear: &LinearClient, api: &ApiClient, args: &BacklogArgs) -> Result<()> {
    println!("Starting daemon mode (poll every {}s)", args.interval);
    println!("Label filter: {}", args.label.as_deref().unwrap_or("none"));
    println!("Press Ctrl+C to stop");

    loop {
        match linear.pending_issues(args.label.as_deref(), 1).await {
            Ok(issues) if !issues.is_empty() => {
                if let Err(e) = process_issue(linear, api, &issues[0]).await {
                    warn!(error = format!("{e:#}"), "issue processing failed");
                }
            }
            Ok(_) => info!("no pending issues"),
            Err(e) => warn!(error = %e, "failed to fetch issues"),
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("backlog worker interrupted");
                return Ok(());
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(args.interval)) => {}
        }
    }
}

/// Run one issue through the agent and report back to Linear.
async fn process_issue(linear: &LinearClient, api: &ApiClient, issue: &Issue) -> Result<bool> {
    println!("\n{}", "=".repeat(60));
    println!("Processing: {} - {}", issue.identifier, issue.title);
    if let Some(url) = &issue.url {
        println!("URL: {url}");
    }
    println!("State: {}", issue.state_name());
    println!("{}", "=".repeat(60));

    if let Err(e) = linear.update_issue_state(&issue.id, states::IN_PROGRESS).await {
        warn!(error = %e, "could not move issue to In Progress");
    }

    let prompt = build_prompt(issue);
    let mut stream = match api.submit_task(&prompt, None).await {
        Ok(stream) => stream,
        Err(ApiError::Busy { current_task }) => {
            println!("Error: agent is busy with task {current_task}");
            return Ok(false);
        }
        Err(e) => return Err(e).context("failed to reach the agent server"),
    };

    let mut output_lines: Vec<String> = Vec::new();
    let mut success = false;

    while let Some(event) = stream.next().await {
        let event = event?;
        match event.event.as_str() {
            "output" => {
                if let Some(line) = event.data["line"].as_str() {
                    output_lines.push(line.to_owned());
                    if let Some(rendered) = render_agent_line(line) {
                        print!("{rendered}");
                    }
                }
            }
            "done" => {
                success = event.data["state"] == "completed";
                println!("\n[{}]", if success { "SUCCESS" } else { "FAILED" });
            }
            _ => {}
        }
    }

    let comment = result_comment(success, &output_lines);
    if let Err(e) = linear.add_comment(&issue.id, &comment).await {
        warn!(error = %e, "could not post result comment");
    }

    // Success goes to review; failure goes back to the queue for a
    // human rather than an automatic retry.
    let next_state = if success {
        states::IN_REVIEW
    } else {
        states::TODO
    };
    if let Err(e) = linear.update_issue_state(&issue.id, next_state).await {
        warn!(error = %e, "could not update issue state");
    }

    Ok(success)
}
