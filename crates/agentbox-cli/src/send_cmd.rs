//! `agentbox send`: append a command record to the protocol files.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Result, bail};

use agentbox_protocol::{CommandRecord, CommandsFile};

use crate::config::Settings;

pub async fn run_send(
    settings: &Settings,
    task: Option<String>,
    workdir: Option<PathBuf>,
    stdin: bool,
    abort: bool,
) -> Result<()> {
    settings.protocol.ensure_dir().await?;
    let commands = CommandsFile::new(settings.protocol.commands_path());

    if abort {
        let record = CommandRecord::abort();
        commands.append(&record).await?;
        println!("Sent abort command: {}", record.id);
        return Ok(());
    }

    let task = if stdin {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer.trim().to_owned()
    } else {
        match task {
            Some(task) => task,
            None => bail!("no task given; pass a prompt, --stdin, or --abort"),
        }
    };
    if task.is_empty() {
        bail!("task text is empty");
    }

    let record = CommandRecord::task(task.clone(), workdir);
    commands.append(&record).await?;

    println!("Task sent: {}", record.id);
    let shown: String = task.chars().take(100).collect();
    println!(
        "Task: {shown}{}",
        if task.chars().count() > 100 { "..." } else { "" }
    );
    println!(
        "\nWatch output: tail -f {}",
        settings.protocol.output_path().display()
    );
    Ok(())
}
