//! # Replichat — Main Entry Point
//!
//! Dispatches to either a replica server or a minimal line-based client.
//! Logging setup uses a dual-layer (detailed file/stderr + colorized
//! stdout) `tracing-subscriber` configuration.

use anyhow::{bail, Result};
use clap::Parser;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

use replichat::chat::{self, replica, Config, ReplicaAddr};
use replichat::logging::ColorizedFormatter;

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let guard;
    let detailed_log_layer;

    if let Some("stderr") = args.log_file.as_deref() {
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(log_level)
            .boxed();
        guard = None;
    } else {
        let file_appender = match args.log_file.as_deref() {
            Some(path_str) => {
                let log_path = std::path::Path::new(path_str);
                let log_dir = log_path.parent().unwrap_or_else(|| std::path::Path::new("."));
                let log_filename = log_path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("replichat.log"));
                tracing_appender::rolling::daily(log_dir, log_filename)
            }
            None => tracing_appender::rolling::daily(".", "replichat.log"),
        };
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_filter(log_level)
            .boxed();
        guard = Some(file_guard);
    }

    let stdout_log = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(stdout_log)
        .init();
    let _log_guard = guard;

    match args.command.clone() {
        Command::Server { host, port } => run_server(&args, host, port).await,
        Command::Client { host, port } => run_client(host, port).await,
    }
}

async fn run_server(args: &Args, host: String, port: u16) -> Result<()> {
    let config = Config::load(&args.config)?;
    let self_addr = ReplicaAddr::new(host.clone(), port);

    if config.position_of(&self_addr).is_none() {
        bail!("{self_addr} is not listed in {}", args.config.display());
    }

    info!("starting replica at {self_addr}");
    let state = chat::ChatState::new(self_addr.clone(), config, self_addr.db_file_name());
    state.connect_downstream().await;

    let listener = TcpListener::bind((host.as_str(), port)).await?;
    info!("listening on {self_addr}");

    loop {
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true).ok();
        let state = state.clone();

        tokio::spawn(async move {
            info!("accepted connection from {peer}");
            let conn_id = state.fresh_connection_id();
            let (session, event_loop) = replichat::rpc::spawn_session(stream);

            state.register_shared_handlers(&session, conn_id).await;
            let user_session = chat::UserSession::new(state.clone(), session.clone());
            user_session.register_handlers().await;

            event_loop.run().await;

            user_session.on_disconnect().await;
            state.on_connection_closed(conn_id).await;
            info!("connection from {peer} closed");
        });
    }
}

/// A minimal, non-interactive line client. A full interactive terminal
/// UI is out of scope; this exists only so the RPC surface has a
/// runnable external caller.
async fn run_client(host: String, port: u16) -> Result<()> {
    let addr = ReplicaAddr::new(host, port);
    let (session, event_loop) = replica::dial(&addr).await?;
    tokio::spawn(event_loop.run());

    let recv_session = session.clone();
    session
        .register_handler(
            "receive_message",
            replichat::Handler::new(move |params| {
                let _ = &recv_session;
                async move {
                    if let Some(msg) = params.first() {
                        println!("[message] {msg}");
                    }
                    Ok(Value::Null)
                }
            }),
        )
        .await;

    match session.request("register_client", vec![]).await {
        Ok(resp) if resp.error.is_none() => info!("connected to primary at {addr}"),
        Ok(resp) => warn!("connected to {addr}, but it is not primary: {:?}", resp.error),
        Err(_) => error!("failed to reach {addr}"),
    }

    println!("commands: create <user> | delete <user> | list | login <user> | send <recipient> <text> | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.trim().splitn(2, ' ');
        let cmd = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").to_string();

        let outcome = match cmd {
            "create" => session.request("create_user", vec![json!(rest)]).await,
            "delete" => session.request("delete_user", vec![json!(rest)]).await,
            "list" => session.request("list_users", vec![]).await,
            "login" => session.request("login", vec![json!(rest)]).await,
            "send" => {
                let mut sp = rest.splitn(2, ' ');
                let recipient = sp.next().unwrap_or("").to_string();
                let text = sp.next().unwrap_or("").to_string();
                session.request("send", vec![json!(text), json!(recipient)]).await
            }
            "quit" | "" => break,
            other => {
                println!("unknown command: {other}");
                continue;
            }
        };

        match outcome {
            Ok(resp) => match (resp.result, resp.error) {
                (Some(result), _) => println!("{result}"),
                (_, Some(err)) => println!("error: {err}"),
                _ => {}
            },
            Err(_) => {
                println!("disconnected");
                break;
            }
        }
    }

    Ok(())
}
