//! triallink - drive a line-delimited JSON tool server from the terminal
//!
//! Replaces a drawer of one-off debug scripts: discover the catalog, call a
//! tool with JSON arguments, or use the AACT shortcuts (`tables`, `query`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use triallink_core::{ClientConfig, ToolClient};

#[derive(Parser)]
#[command(name = "triallink", version, about = "Tool-server client for the AACT clinical trials database")]
struct Cli {
    /// Config file (default: ~/.config/triallink/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Per-call timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover and print the tool catalog
    Tools,
    /// Call one tool with JSON arguments
    Call {
        /// Tool name as advertised in the catalog
        name: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// List tables in the clinical-trials database
    Tables,
    /// Run a SELECT query against the clinical-trials database
    Query {
        /// SQL SELECT statement
        sql: String,
        /// Cap the number of returned rows
        #[arg(long)]
        max_rows: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::load(cli.config.as_deref())?;
    if let Some(secs) = cli.timeout {
        config.call_timeout = Duration::from_secs(secs);
    }

    tracing::debug!(server = ?config.server, "starting tool client");

    let client = ToolClient::new(config);
    client
        .start()
        .await
        .context("failed to start tool server")?;

    let outcome = run(&cli.command, &client).await;

    client.stop().await;
    outcome
}

async fn run(command: &Command, client: &ToolClient) -> Result<()> {
    match command {
        Command::Tools => {
            let mut tools = client.tools().await;
            tools.sort_by(|a, b| a.name.cmp(&b.name));
            for tool in tools {
                println!("{}", tool.name);
                if let Some(description) = &tool.description {
                    println!("    {}", description);
                }
                for (param, spec) in &tool.parameters.properties {
                    let required = tool.parameters.required.contains(param);
                    println!(
                        "    - {}{}{}",
                        param,
                        spec.kind.map(|k| format!(" ({})", k.label())).unwrap_or_default(),
                        if required { " [required]" } else { "" },
                    );
                }
            }
            Ok(())
        }
        Command::Call { name, args } => {
            let args: Value = serde_json::from_str(args)
                .with_context(|| format!("--args is not valid JSON: {}", args))?;
            print_result(client.invoke(name, args).await?);
            Ok(())
        }
        Command::Tables => {
            print_result(client.invoke("list_tables", json!({})).await?);
            Ok(())
        }
        Command::Query { sql, max_rows } => {
            if !sql.trim_start().to_uppercase().starts_with("SELECT") {
                bail!("only SELECT queries are accepted");
            }
            let mut args = json!({ "query": sql });
            if let Some(max_rows) = max_rows {
                args["max_rows"] = json!(max_rows);
            }
            print_result(client.invoke("read_query", args).await?);
            Ok(())
        }
    }
}

fn print_result(result: Value) {
    match result {
        Value::String(s) => println!("{}", s),
        other => println!("{}", serde_json::to_string_pretty(&other).unwrap_or_default()),
    }
}
