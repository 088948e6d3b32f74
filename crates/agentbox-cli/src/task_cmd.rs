//! `agentbox task`: submit a prompt and render the live stream.

use std::path::Path;

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use serde_json::Value;

use crate::api::{ApiClient, ApiError};

pub async fn run_task(server: &str, prompt: &str, workdir: Option<&Path>) -> Result<()> {
    println!("Sending task to {server}...");
    println!("Prompt: {}", excerpt(prompt, 100));
    println!("{}", "-".repeat(60));

    let client = ApiClient::new(server);
    let mut stream = match client.submit_task(prompt, workdir).await {
        Ok(stream) => stream,
        Err(ApiError::Busy { current_task }) => {
            bail!("agent is busy with task {current_task}");
        }
        Err(e) => return Err(e).context("failed to submit task"),
    };

    while let Some(event) = stream.next().await {
        let event = event?;
        match event.event.as_str() {
            "start" => {
                println!(
                    "[STARTED] Task ID: {}",
                    event.data["task_id"].as_str().unwrap_or("?")
                );
                println!("{}", "-".repeat(60));
            }
            "output" => {
                if let Some(line) = event.data["line"].as_str() {
                    if let Some(rendered) = render_agent_line(line) {
                        print!("{rendered}");
                    }
                }
            }
            "done" => {
                println!("\n{}", "-".repeat(60));
                let state = event.data["state"].as_str().unwrap_or("unknown");
                println!(
                    "[{}] Exit code: {}",
                    state.to_uppercase(),
                    event.data["exit_code"]
                );
                if let Some(error) = event.data["error"].as_str() {
                    println!("Error: {error}");
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Render one raw agent output line for a human.
///
/// Claude's stream-json lines get their text and tool-call content
/// pulled out; anything else is passed through verbatim.
pub fn render_agent_line(line: &str) -> Option<String> {
    let Ok(parsed) = serde_json::from_str::<Value>(line) else {
        // Plain text output.
        return Some(format!("{line}\n"));
    };

    match parsed["type"].as_str() {
        Some("assistant") => {
            let mut out = String::new();
            if let Some(blocks) = parsed.pointer("/message/content").and_then(Value::as_array) {
                for block in blocks {
                    match block["type"].as_str() {
                        Some("text") => {
                            if let Some(text) = block["text"].as_str() {
                                out.push_str(text);
                            }
                        }
                        Some("tool_use") => {
                            out.push_str(&format!(
                                "\n[TOOL] {}: {}\n",
                                block["name"].as_str().unwrap_or("unknown"),
                                block["input"]
                            ));
                        }
                        _ => {}
                    }
                }
            }
            (!out.is_empty()).then_some(out)
        }
        Some("result") => {
            let mut out = String::new();
            if let Some(text) = parsed["result"].as_str() {
                out.push_str(&format!("\n{text}\n"));
            }
            if let Some(cost) = parsed["cost_usd"].as_f64() {
                out.push_str(&format!("[RESULT] Cost: ${cost:.4}\n"));
            }
            (!out.is_empty()).then_some(out)
        }
        // system/tool_result noise from the stream-json firehose.
        Some(_) => None,
        None => Some(format!("{line}\n")),
    }
}

fn excerpt(text: &str, max: usize) -> String {
    let mut end = text.len().min(max);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    if end < text.len() {
        format!("{}...", &text[..end])
    } else {
        text.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_text_blocks_are_extracted() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello!"}]}}"#;
        assert_eq!(render_agent_line(line).unwrap(), "Hello!");
    }

    #[test]
    fn tool_use_blocks_are_labelled() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Bash","input":{"command":"ls"}}]}}"#;
        let out = render_agent_line(line).unwrap();
        assert!(out.contains("[TOOL] Bash"));
        assert!(out.contains("ls"));
    }

    #[test]
    fn result_line_shows_text_and_cost() {
        let line = r#"{"type":"result","result":"All done.","cost_usd":0.0123}"#;
        let out = render_agent_line(line).unwrap();
        assert!(out.contains("All done."));
        assert!(out.contains("$0.0123"));
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(render_agent_line("just text").unwrap(), "just text\n");
    }

    #[test]
    fn other_stream_json_types_are_suppressed() {
        let line = r#"{"type":"system","subtype":"init"}"#;
        assert!(render_agent_line(line).is_none());
    }

    #[test]
    fn excerpt_truncates_long_prompts() {
        assert_eq!(excerpt("short", 100), "short");
        let long = "x".repeat(150);
        let e = excerpt(&long, 100);
        assert!(e.ends_with("..."));
        assert_eq!(e.len(), 103);
    }
}
