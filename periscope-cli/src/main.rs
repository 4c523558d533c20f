// periscope/periscope-cli/src/main.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value as Json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use periscope::discovery::DiscoveryRegistry;
use periscope_proto::{Op, Request, Response};

/// Periscope CLI — inspect and mutate a running instance over its
/// loopback inspection socket.
#[derive(Parser)]
#[command(version, about = "Periscope CLI — runtime inspection controller", long_about = None)]
struct Cli {
    /// Server host (must be loopback).
    #[arg(long, default_value = "127.0.0.1", global = true)]
    host: String,

    /// Server port.
    #[arg(long, default_value_t = 9229, global = true)]
    port: u16,

    /// Resolve the target through the discovery registry instead of
    /// host/port. Prunes the record if the instance no longer answers.
    #[arg(long, value_name = "INSTANCE_ID", global = true)]
    app: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the instance is alive
    Ping,
    /// Namespace overview plus server session info
    State,
    /// Bounded deep inspection of the value at a path
    Inspect {
        path: String,
        /// Recursion depth limit
        #[arg(long)]
        depth: Option<usize>,
        /// Per-container children limit
        #[arg(long)]
        items: Option<usize>,
    },
    /// Shallow one-level listing at a path
    List { path: String },
    /// Quick type + repr at a path
    Repr { path: String },
    /// Source location/text of the item at a path
    Source { path: String },
    /// Evaluate an expression on the instance
    Run { code: String },
    /// Invoke a callable at a path; arguments are JSON literals
    Call {
        path: String,
        args: Vec<String>,
    },
    /// Assign a JSON value at a path
    Set {
        path: String,
        value: String,
    },
    /// List live instances from the discovery registry
    Apps,
}

async fn send_request(host: &str, port: u16, request: Request) -> anyhow::Result<Response> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to {host}:{port}: {e}"))?;
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    let request_json = serde_json::to_vec(&request)?;
    writer.write_all(&request_json).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;

    if response_line.is_empty() {
        anyhow::bail!("server closed connection unexpectedly");
    }

    let response: Response = serde_json::from_str(&response_line)?;
    Ok(response)
}

/// A literal argument: JSON if it parses, a plain string otherwise.
fn parse_arg(raw: &str) -> Json {
    serde_json::from_str(raw).unwrap_or_else(|_| Json::String(raw.to_string()))
}

fn print_response(resp: Response) {
    match (resp.result, resp.error) {
        (Some(result), _) => println!("{result:#}"),
        (None, Some(error)) => {
            eprintln!("Error ({:?}): {}", error.kind, error.message);
            std::process::exit(1);
        }
        (None, None) => {
            eprintln!("Error: empty response");
            std::process::exit(1);
        }
    }
}

fn build_request(command: &Commands) -> (Op, Json) {
    match command {
        Commands::Ping => (Op::Ping, Json::Null),
        Commands::State => (Op::State, Json::Null),
        Commands::Inspect { path, depth, items } => {
            let mut params = json!({ "path": path });
            if let Some(depth) = depth {
                params["max_depth"] = json!(depth);
            }
            if let Some(items) = items {
                params["max_items"] = json!(items);
            }
            (Op::Inspect, params)
        }
        Commands::List { path } => (Op::ListPath, json!({ "path": path })),
        Commands::Repr { path } => (Op::Repr, json!({ "path": path })),
        Commands::Source { path } => (Op::Source, json!({ "path": path })),
        Commands::Run { code } => (Op::Run, json!({ "code": code })),
        Commands::Call { path, args } => {
            let args: Vec<Json> = args.iter().map(|a| parse_arg(a)).collect();
            (Op::Call, json!({ "path": path, "args": args }))
        }
        Commands::Set { path, value } => {
            (Op::SetValue, json!({ "path": path, "value": parse_arg(value) }))
        }
        Commands::Apps => (Op::RunningApps, Json::Null),
    }
}

async fn resolve_target(cli: &Cli) -> anyhow::Result<(String, u16)> {
    match &cli.app {
        Some(instance_id) => {
            let dir = DiscoveryRegistry::default_dir()
                .map_err(|e| anyhow::anyhow!("discovery registry unavailable: {e}"))?;
            let record = DiscoveryRegistry::new(dir)
                .resolve(instance_id, Duration::from_secs(1))
                .await
                .map_err(|e| anyhow::anyhow!("cannot resolve `{instance_id}`: {e}"))?;
            Ok((record.host, record.port))
        }
        None => Ok((cli.host.clone(), cli.port)),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // `apps` needs no server; it reads (and prunes) the registry directly.
    if matches!(cli.command, Commands::Apps) && cli.app.is_none() {
        let dir = DiscoveryRegistry::default_dir()
            .map_err(|e| anyhow::anyhow!("discovery registry unavailable: {e}"))?;
        let live = DiscoveryRegistry::new(dir)
            .list_live(Duration::from_secs(1))
            .await;
        println!("{:#}", serde_json::to_value(live)?);
        return Ok(());
    }

    let (host, port) = resolve_target(&cli).await?;
    let (op, params) = build_request(&cli.command);
    let response = send_request(
        &host,
        port,
        Request {
            id: json!(1),
            op,
            params,
        },
    )
    .await?;
    print_response(response);
    Ok(())
}
