//! Duet 命令行
//!
//! 每个子命令对应一个操作者操作，结果以 JSON 打印到 stdout；日志走 stderr。

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use duet::config::load_config;
use duet::Conductor;

#[derive(Debug, Parser)]
#[command(name = "duet", about = "Drive a two-agent conversation from the command line")]
struct Cli {
    /// Extra config file layered over config/default.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List sessions, newest first
    List,
    /// Create a session and make it active
    Create {
        #[arg(long)]
        name: Option<String>,
    },
    /// Show one session with its transcript in saved order
    Show { id: String },
    /// Make a session the active one
    Activate { id: String },
    /// Delete a session and its archive
    Delete { id: String },
    /// Running / active session status
    Status,
    /// Transcript of the active session in live order
    Feed,
    /// Launch the agents for the active session
    Start,
    /// Send a message to the active session and (re)start the conversation
    Send { text: String },
    /// Stop the running conversation
    Stop,
    /// Message statistics across sessions
    Stats,
    /// Idea review board
    Ideas,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    duet::observability::init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config).context("Failed to load config")?;
    let conductor = Conductor::from_config(&cfg);

    match cli.command {
        Command::List => print_json(&conductor.list_sessions().await?)?,
        Command::Create { name } => {
            let session = conductor
                .create_session(name.as_deref())
                .await
                .context("Failed to create session")?;
            print_json(&json!({ "success": true, "session": session }))?
        }
        Command::Show { id } => print_json(&json!({ "session": conductor.get_session(&id).await? }))?,
        Command::Activate { id } => {
            conductor.activate_session(&id).await?;
            print_json(&json!({ "success": true }))?
        }
        Command::Delete { id } => {
            conductor.delete_session(&id).await.context("Failed to delete session")?;
            print_json(&json!({ "success": true }))?
        }
        Command::Status => print_json(&conductor.live_status().await?)?,
        Command::Feed => print_json(&conductor.live_feed().await?)?,
        Command::Start => {
            let session_id = conductor.start().await?;
            print_json(&json!({ "success": true, "message": "Sessions started", "sessionId": session_id }))?
        }
        Command::Send { text } => {
            let message = conductor.send(&text).await?;
            print_json(&json!({ "success": true, "message": "Message sent", "id": message.id }))?
        }
        Command::Stop => {
            conductor.stop().await;
            print_json(&json!({ "success": true, "message": "Sessions stopped" }))?
        }
        Command::Stats => print_json(&conductor.conversation_stats().await?)?,
        Command::Ideas => print_json(&conductor.idea_board().await?)?,
    }

    Ok(())
}
