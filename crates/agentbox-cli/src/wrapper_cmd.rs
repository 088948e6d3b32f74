//! `agentbox wrapper`: the file-protocol front end.
//!
//! Polls `commands.jsonl` at a bounded interval (the files are the
//! interface, so this is the compatibility mode the protocol keeps) and
//! pushes each unprocessed task through the same service the HTTP
//! front end uses. File-submitted and HTTP-submitted tasks contend for
//! the same single slot.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use tracing::{info, warn};

use agentbox_core::harness::ClaudeCodeAdapter;
use agentbox_core::{AgentService, SubmitError, TaskEvent};
use agentbox_protocol::{CommandKind, CommandRecord, CommandsFile, ProcessedSet, RunState, Task};

use crate::config::Settings;
use crate::task_cmd::render_agent_line;

async fn build_service(settings: &Settings) -> Result<Arc<AgentService>> {
    let mut adapter =
        ClaudeCodeAdapter::with_binary(settings.agent_binary.as_str()).workspace(&settings.workspace);
    if let Some(key) = &settings.anthropic_api_key {
        adapter = adapter.api_key(key.as_str());
    }
    AgentService::new(&settings.protocol, Arc::new(adapter)).await
}

/// Run a single prompt to completion and return the exit code to
/// propagate (non-exit terminations map to 1).
pub async fn run_once(settings: &Settings, prompt: &str, workdir: Option<PathBuf>) -> Result<i32> {
    let service = build_service(settings).await?;
    let mut stream = service.submit(Task::new(prompt, workdir)).await?;

    println!("{}", "=".repeat(60));
    let mut exit = 1;
    while let Some(event) = stream.next().await {
        match event {
            TaskEvent::Start { .. } => {}
            TaskEvent::Output { line } => {
                if let Some(rendered) = render_agent_line(&line) {
                    print!("{rendered}");
                }
            }
            TaskEvent::Done {
                state,
                exit_code,
                error,
                ..
            } => {
                println!("\n{}", "=".repeat(60));
                println!("State: {state}");
                if let Some(error) = error {
                    println!("Error: {error}");
                }
                exit = match (state, exit_code) {
                    (RunState::Completed, _) => 0,
                    (_, Some(code)) => code,
                    (_, None) => 1,
                };
            }
        }
    }
    Ok(exit)
}

/// Watch `commands.jsonl` and process commands until interrupted.
pub async fn run_wrapper(settings: &Settings) -> Result<()> {
    let service = build_service(settings).await?;
    let commands = CommandsFile::new(settings.protocol.commands_path());
    let mut processed = ProcessedSet::load(settings.protocol.processed_path()).await?;

    info!(
        dir = %settings.protocol.dir().display(),
        "wrapper started, watching for commands"
    );
    println!(
        "Protocol directory: {}",
        settings.protocol.dir().display()
    );
    println!(
        "Send tasks to:      {}",
        settings.protocol.commands_path().display()
    );
    println!(
        "Read output from:   {}",
        settings.protocol.output_path().display()
    );
    println!();

    loop {
        let pending: Vec<CommandRecord> = commands
            .read_all()
            .await?
            .into_iter()
            .filter(|cmd| !processed.contains(&cmd.id))
            .collect();

        for cmd in pending {
            match cmd.kind {
                CommandKind::Abort => {
                    info!(command_id = %cmd.id, outcome = ?service.stop(), "abort command");
                    processed.mark(&cmd.id).await?;
                }
                CommandKind::Task => {
                    if !handle_task_command(&service, &mut processed, &cmd).await? {
                        // Busy: leave the command queued for the next poll.
                        break;
                    }
                }
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("wrapper interrupted");
                return Ok(());
            }
            _ = tokio::time::sleep(settings.protocol.poll_interval) => {}
        }
    }
}

/// Submit one task command and wait for it to finish. Returns `false`
/// when the slot was busy and the command should stay queued.
async fn handle_task_command(
    service: &Arc<AgentService>,
    processed: &mut ProcessedSet,
    cmd: &CommandRecord,
) -> Result<bool> {
    let Some(prompt) = cmd.task.clone().filter(|t| !t.trim().is_empty()) else {
        warn!(command_id = %cmd.id, "task command with no prompt, skipping");
        processed.mark(&cmd.id).await?;
        return Ok(true);
    };

    info!(command_id = %cmd.id, "processing task command");
    // Reuse the command id as the task id so the output record
    // correlates with the command that requested it.
    let task = Task::with_id(cmd.id.clone(), prompt, cmd.workdir.clone());

    let mut stream = match service.submit(task).await {
        Ok(stream) => stream,
        Err(SubmitError::Busy { current }) => {
            warn!(command_id = %cmd.id, current = %current, "agent busy, leaving command queued");
            return Ok(false);
        }
        Err(SubmitError::Internal(e)) => return Err(e),
    };

    while let Some(event) = stream.next().await {
        if let TaskEvent::Done {
            state, exit_code, ..
        } = event
        {
            match state {
                RunState::Completed => info!(command_id = %cmd.id, "task completed"),
                _ => warn!(
                    command_id = %cmd.id,
                    state = %state,
                    exit_code = ?exit_code,
                    "task did not complete"
                ),
            }
        }
    }

    processed.mark(&cmd.id).await?;
    Ok(true)
}
