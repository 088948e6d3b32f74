mod api;
mod backlog_cmd;
mod config;
mod send_cmd;
mod serve_cmd;
mod status_cmd;
mod task_cmd;
mod watch_cmd;
mod wrapper_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::Settings;

#[derive(Parser)]
#[command(
    name = "agentbox",
    about = "Single-task coordination service for a headless coding agent"
)]
struct Cli {
    /// Protocol directory (overrides AGENT_PROTOCOL_DIR)
    #[arg(long, global = true)]
    protocol_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (SSE task streaming, status, history)
    Serve {
        /// Bind host (overrides AGENT_HOST)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides AGENT_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Default working directory for tasks (overrides WORKSPACE_DIR)
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
    /// Submit a task to a running server and stream its output
    Task {
        /// The prompt to hand to the agent
        prompt: String,
        /// Working directory for the task
        #[arg(long, short)]
        workdir: Option<PathBuf>,
        /// Server URL (overrides AGENTBOX_SERVER)
        #[arg(long, short)]
        server: Option<String>,
    },
    /// Show the current status record
    Status {
        #[arg(long, short)]
        server: Option<String>,
    },
    /// Stop the current task
    Stop {
        #[arg(long, short)]
        server: Option<String>,
    },
    /// Show recent task history, most recent first
    History {
        /// Maximum entries to show
        #[arg(long, short = 'n', default_value_t = 10)]
        limit: usize,
        #[arg(long, short)]
        server: Option<String>,
    },
    /// Append a task command to the protocol files
    Send {
        /// The task to send (omit with --stdin or --abort)
        task: Option<String>,
        /// Working directory for the task
        #[arg(long, short)]
        workdir: Option<PathBuf>,
        /// Read the task text from stdin
        #[arg(long)]
        stdin: bool,
        /// Send an abort command instead of a task
        #[arg(long)]
        abort: bool,
    },
    /// Watch protocol output and status files
    Watch {
        /// Show the last N responses and exit
        #[arg(long, short = 'n')]
        last: Option<usize>,
        /// Show the response for a specific task id and exit
        #[arg(long)]
        id: Option<String>,
        /// Show the current status and exit
        #[arg(long, short)]
        status: bool,
        /// Also show prompts
        #[arg(long, short)]
        verbose: bool,
    },
    /// Run the file-protocol front end: poll commands.jsonl for tasks
    Wrapper {
        /// Run a single prompt and exit instead of watching
        #[arg(long, short)]
        once: Option<String>,
        /// Working directory for --once
        #[arg(long, short)]
        workdir: Option<PathBuf>,
        /// Poll interval in seconds (overrides AGENT_POLL_INTERVAL)
        #[arg(long, short)]
        interval: Option<f64>,
    },
    /// Process Linear backlog issues through the agent
    Backlog {
        /// Keep running and poll for new issues
        #[arg(long, short)]
        daemon: bool,
        /// Show what would be processed without doing it
        #[arg(long)]
        dry_run: bool,
        /// Only process issues with this label
        #[arg(long, short)]
        label: Option<String>,
        /// Daemon poll interval in seconds
        #[arg(long, short, default_value_t = 60)]
        interval: u64,
        /// Max issues to list
        #[arg(long, short = 'n', default_value_t = 5)]
        limit: usize,
        #[arg(long, short)]
        server: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::resolve()?;
    if let Some(dir) = cli.protocol_dir {
        settings.protocol.dir = dir;
    }

    match cli.command {
        Commands::Serve {
            host,
            port,
            workspace,
        } => {
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            if let Some(workspace) = workspace {
                settings.workspace = workspace;
            }
            serve_cmd::run_serve(&settings).await?;
        }
        Commands::Task {
            prompt,
            workdir,
            server,
        } => {
            let server = server.unwrap_or(settings.server_url);
            task_cmd::run_task(&server, &prompt, workdir.as_deref()).await?;
        }
        Commands::Status { server } => {
            let server = server.unwrap_or(settings.server_url);
            status_cmd::run_status(&server).await?;
        }
        Commands::Stop { server } => {
            let server = server.unwrap_or(settings.server_url);
            status_cmd::run_stop(&server).await?;
        }
        Commands::History { limit, server } => {
            let server = server.unwrap_or(settings.server_url);
            status_cmd::run_history(&server, limit).await?;
        }
        Commands::Send {
            task,
            workdir,
            stdin,
            abort,
        } => {
            send_cmd::run_send(&settings, task, workdir, stdin, abort).await?;
        }
        Commands::Watch {
            last,
            id,
            status,
            verbose,
        } => {
            watch_cmd::run_watch(&settings, last, id.as_deref(), status, verbose).await?;
        }
        Commands::Wrapper {
            once,
            workdir,
            interval,
        } => {
            if let Some(secs) = interval {
                settings.protocol.poll_interval = std::time::Duration::from_secs_f64(secs.max(0.1));
            }
            match once {
                Some(prompt) => {
                    let code = wrapper_cmd::run_once(&settings, &prompt, workdir).await?;
                    if code != 0 {
                        std::process::exit(code);
                    }
                }
                None => wrapper_cmd::run_wrapper(&settings).await?,
            }
        }
        Commands::Backlog {
            daemon,
            dry_run,
            label,
            interval,
            limit,
            server,
        } => {
            let server = server.unwrap_or_else(|| settings.server_url.clone());
            backlog_cmd::run_backlog(
                &settings,
                &server,
                backlog_cmd::BacklogArgs {
                    daemon,
                    dry_run,
                    label,
                    interval,
                    limit,
                },
            )
            .await?;
        }
    }

    Ok(())
}
