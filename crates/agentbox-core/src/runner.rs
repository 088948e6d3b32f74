//! The worker driver: runs one admitted task to a terminal state.
//!
//! Owns the external process for the lifetime of the run. Per output
//! line, the durable log append happens before the live publish, so the
//! log never trails what subscribers have seen. Every termination path
//! funnels through [`finish`], which performs exactly one terminal
//! status write and one terminal publish, in that order, then releases
//! the admission slot.

use std::sync::Arc;
use std::time::Duration;

use agentbox_protocol::{
    DurableLog, LogEntry, OutputFile, OutputRecord, RunState, StatusRecord, StatusStore, Task,
    TaskRun,
};
use chrono::Utc;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::admission::TaskSlot;
use crate::events::{EventBroadcaster, TaskEvent};
use crate::harness::Harness;
use crate::history::History;

/// Everything the driver needs for one run.
pub(crate) struct RunContext {
    pub harness: Arc<dyn Harness>,
    pub slot: Arc<TaskSlot>,
    pub log: DurableLog,
    pub status: StatusStore,
    pub output: OutputFile,
    pub history: Arc<History>,
    pub broadcaster: EventBroadcaster,
    pub cancel: CancellationToken,
    pub timeout: Duration,
}

/// How the streaming loop ended.
enum Termination {
    /// The process closed stdout; wait for its exit code.
    Exited,
    Cancelled,
    TimedOut,
    LogFailure(anyhow::Error),
}

/// Drive an admitted task to a terminal state.
///
/// The caller has already claimed the admission slot and appended the
/// command entry; this function owns everything from the running
/// transition onward.
pub(crate) async fn drive(ctx: RunContext, task: Task) {
    let task_id = task.id.clone();
    info!(task_id = %task_id, "starting task run");

    // Record the running transition, durably, before anything observable.
    if let Err(e) = ctx
        .log
        .append(&LogEntry::status(&task.id, RunState::Running, None))
        .await
    {
        let mut run = TaskRun::started(task);
        run.state = RunState::Failed;
        run.error = Some(format!("durable log append failed: {e:#}"));
        finish(&ctx, run).await;
        return;
    }
    if let Err(e) = ctx.status.write(&StatusRecord::working(&task)).await {
        let mut run = TaskRun::started(task);
        run.state = RunState::Failed;
        run.error = Some(format!("status write failed: {e:#}"));
        finish(&ctx, run).await;
        return;
    }

    ctx.broadcaster.publish(TaskEvent::Start {
        task_id: task.id.clone(),
        prompt: task.prompt.clone(),
    });

    let mut handle = match ctx.harness.spawn(&task).await {
        Ok(handle) => handle,
        Err(e) => {
            // Launch failure is terminal and never retried here; retry
            // policy belongs to the caller.
            warn!(task_id = %task_id, error = format!("{e:#}"), "agent launch failed");
            let mut run = TaskRun::started(task);
            run.state = RunState::Failed;
            run.error = Some(format!("{e:#}"));
            finish(&ctx, run).await;
            return;
        }
    };

    // Hand the prompt to the agent and close stdin so it starts.
    if let Some(mut stdin) = handle.stdin.take() {
        let prompt = format!("{}\n", task.prompt);
        if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
            warn!(task_id = %task_id, error = %e, "failed to write prompt to agent stdin");
        }
        drop(stdin);
    }

    let mut run = TaskRun::started(task);
    let mut lines = ctx.harness.output_lines(&handle);
    let deadline = tokio::time::sleep(ctx.timeout);
    tokio::pin!(deadline);

    let termination = loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break Termination::Cancelled,
            _ = &mut deadline => break Termination::TimedOut,
            next = lines.next() => match next {
                Some(line) => {
                    // Durable log first, then the live publish.
                    if let Err(e) = ctx
                        .log
                        .append(&LogEntry::output(&run.task.id, line.clone()))
                        .await
                    {
                        break Termination::LogFailure(e);
                    }
                    run.output_lines.push(line.clone());
                    ctx.broadcaster.publish(TaskEvent::Output { line });
                }
                None => break Termination::Exited,
            }
        }
    };

    match termination {
        Termination::Exited => match ctx.harness.wait(&handle).await {
            Ok(code) => {
                run.exit_code = code;
                run.state = match code {
                    Some(0) => RunState::Completed,
                    Some(_) => RunState::Failed,
                    None => RunState::Failed,
                };
                if code.is_none() {
                    run.error = Some("agent process terminated by signal".to_owned());
                }
            }
            Err(e) => {
                run.state = RunState::Failed;
                run.error = Some(format!("{e:#}"));
            }
        },
        Termination::Cancelled => {
            info!(task_id = %task_id, "cancelling task run");
            kill_agent(&ctx, &handle).await;
            run.state = RunState::Cancelled;
        }
        Termination::TimedOut => {
            warn!(
                task_id = %task_id,
                timeout_secs = ctx.timeout.as_secs(),
                "task exceeded maximum duration"
            );
            kill_agent(&ctx, &handle).await;
            run.state = RunState::TimedOut;
            run.error = Some(format!("timed out after {}s", ctx.timeout.as_secs()));
        }
        Termination::LogFailure(e) => {
            error!(
                task_id = %task_id,
                error = format!("{e:#}"),
                "durable log append failed, aborting run"
            );
            kill_agent(&ctx, &handle).await;
            run.state = RunState::Failed;
            run.error = Some(format!("durable log append failed: {e:#}"));
        }
    }

    finish(&ctx, run).await;
}

async fn kill_agent(ctx: &RunContext, handle: &crate::harness::AgentHandle) {
    if let Err(e) = ctx.harness.kill(handle).await {
        warn!(
            task_id = %handle.task_id,
            error = format!("{e:#}"),
            "failed to kill agent process"
        );
    }
}

/// Terminal bookkeeping for a run, exactly once per run:
/// status write, log + output records, history append, `Done` publish,
/// slot release -- in that order.
async fn finish(ctx: &RunContext, mut run: TaskRun) {
    debug_assert!(run.state.is_terminal());
    run.finished_at = Some(Utc::now());

    if let Err(e) = ctx.status.write(&StatusRecord::terminal(&run)).await {
        error!(
            task_id = %run.task.id,
            error = format!("{e:#}"),
            "terminal status write failed, state on disk is stale"
        );
    }
    if let Err(e) = ctx
        .log
        .append(&LogEntry::status(&run.task.id, run.state, run.exit_code))
        .await
    {
        error!(task_id = %run.task.id, error = format!("{e:#}"), "terminal log append failed");
    }
    if let Err(e) = ctx.output.append(&OutputRecord::from_run(&run)).await {
        error!(task_id = %run.task.id, error = format!("{e:#}"), "output record append failed");
    }

    let done = TaskEvent::Done {
        task_id: run.task.id.clone(),
        exit_code: run.exit_code,
        state: run.state,
        error: run.error.clone(),
    };
    let task_id = run.task.id.clone();
    let state = run.state;

    ctx.history.push(run);
    ctx.broadcaster.publish(done);
    ctx.slot.release(&task_id);

    info!(task_id = %task_id, state = %state, "task run finished");
}
