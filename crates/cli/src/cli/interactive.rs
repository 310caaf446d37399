//! The interactive client shared by `toolwire pipe`, `socket` and
//! `mailbox`.
//!
//! Lists the server's tools, then loops: pick a tool by number, enter JSON
//! arguments, print the result.  Prompts and diagnostics go to stderr; tool
//! output goes to stdout.

use anyhow::Context;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::{json, Value};

use tw_client::{ClientError, ToolClient};
use tw_protocol::{ErrorKind, ToolCallResult, ToolDescriptor};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run(client: &dyn ToolClient) -> anyhow::Result<()> {
    client
        .connect()
        .await
        .with_context(|| format!("connecting to {}", client.endpoint()))?;
    eprintln!("Connected to {}", client.endpoint());

    let outcome = session(client).await;

    if let Err(e) = client.close().await {
        tracing::warn!(error = %e, "close failed");
    }
    outcome
}

async fn session(client: &dyn ToolClient) -> anyhow::Result<()> {
    let tools = client.list_tools().await.context("listing tools")?.tools;
    if tools.is_empty() {
        eprintln!("The server offers no tools.");
        return Ok(());
    }

    let history_path = dirs::home_dir()
        .unwrap_or_default()
        .join(".toolwire")
        .join("history.txt");
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut rl = DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    print_tools(&tools);
    loop {
        let line = match rl.readline("tool> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                eprintln!("(Type exit or Ctrl+D to quit)");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        };
        let choice = line.trim();
        if choice.is_empty() {
            continue;
        }
        rl.add_history_entry(choice).ok();
        if choice == "exit" || choice == "quit" {
            break;
        }

        let Some(tool) = select_tool(&tools, choice) else {
            eprintln!("Invalid selection: {choice}");
            print_tools(&tools);
            continue;
        };

        let raw = match rl.readline("args (JSON)> ") {
            Ok(raw) => raw,
            Err(ReadlineError::Interrupted) => continue,
            Err(_) => break,
        };
        let args = parse_arguments(&raw);

        match client.call_tool(&tool.name, args).await {
            Ok(result) if result.is_error => eprintln!("Tool reported an error: {}", render_result(&result)),
            Ok(result) => println!("{}", render_result(&result)),
            Err(e) => eprintln!("{}", describe_error(&tool.name, &e)),
        }
    }

    rl.save_history(&history_path).ok();
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn print_tools(tools: &[ToolDescriptor]) {
    eprintln!("Available tools:");
    for (i, tool) in tools.iter().enumerate() {
        if tool.description.is_empty() {
            eprintln!("  {}. {}", i + 1, tool.name);
        } else {
            eprintln!("  {}. {} - {}", i + 1, tool.name, tool.description);
        }
    }
    eprintln!("Choose a tool by number, or type exit.");
}

/// 1-based selection.
fn select_tool<'a>(tools: &'a [ToolDescriptor], choice: &str) -> Option<&'a ToolDescriptor> {
    let n: usize = choice.parse().ok()?;
    tools.get(n.checked_sub(1)?)
}

/// Blank or invalid JSON means no arguments.
fn parse_arguments(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return json!({});
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            eprintln!("Invalid JSON ({e}), calling with no arguments");
            json!({})
        }
    }
}

/// One line for a failed call, worded by what went wrong.
fn describe_error(tool: &str, err: &ClientError) -> String {
    match err.rpc() {
        Some(rpc) => match rpc.kind() {
            ErrorKind::MethodNotFound => format!("The server does not know '{tool}': {}", rpc.message),
            ErrorKind::HandlerError => format!("Tool '{tool}' failed: {}", rpc.message),
            ErrorKind::Other => format!("Server error {}: {}", rpc.code, rpc.message),
        },
        None => format!("Tool call failed: {err}"),
    }
}

fn render_result(result: &ToolCallResult) -> String {
    let text = result.joined_text();
    if !text.is_empty() {
        return text;
    }
    result
        .structured_content
        .as_ref()
        .and_then(|v| serde_json::to_string_pretty(v).ok())
        .unwrap_or_default()
}
