mod api;
mod config;
mod diagnostics;
mod error;
mod probes;
mod scan;

use clap::Parser;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use api::rest::AppState;
use config::{CliArgs, Command, Config};
use diagnostics::{Dispatcher, Method, ProbeOutcome, RequestValidator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli_args = CliArgs::parse();
    let config = Config::load(&cli_args)?;

    // RUST_LOG still wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::from_level(config.log_level).into())
                .from_env_lossy(),
        )
        .init();

    let dispatcher = Dispatcher::from_config(&config)?;
    let validator = RequestValidator::new(config.limits.clone());
    let state = Arc::new(AppState::new(validator, dispatcher));

    match cli_args.command {
        None | Some(Command::Serve) => serve(state, &config).await,
        Some(Command::Probe {
            method,
            target,
            count,
            start,
            end,
        }) => probe_once(&state, &method, target, count, start, end).await,
    }
}

async fn serve(state: Arc<AppState>, config: &Config) -> anyhow::Result<()> {
    tracing::info!("Network diagnostics service starting...");
    tracing::info!(
        "Prober: {:?}, scan workers: {}, max port span: {}",
        config.probes.prober,
        config.scan.workers,
        config.limits.max_port_span
    );

    let addr = SocketAddr::new(config.bind_address.parse()?, config.port);
    let app = api::rest::create_api_router(state, config).into_make_service();

    let base = &config.base_path;
    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  GET  http://{}{}/ping?target=<host>&count=<n>", addr, base);
    tracing::info!("  GET  http://{}{}/traceroute?target=<host>", addr, base);
    tracing::info!("  GET  http://{}{}/dns?domain=<host>", addr, base);
    tracing::info!("  GET  http://{}{}/scan?host=<host>&start=<port>&end=<port>", addr, base);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Run one diagnostic from the command line and print the result
async fn probe_once(
    state: &AppState,
    method: &str,
    target: String,
    count: Option<String>,
    start: Option<String>,
    end: Option<String>,
) -> anyhow::Result<()> {
    let method: Method = method.parse()?;

    let target_key = match method {
        Method::Ping | Method::Traceroute => "target",
        Method::Dns => "domain",
        Method::Scan => "host",
    };
    let mut params = HashMap::from([(target_key.to_string(), target)]);
    for (key, value) in [("count", count), ("start", start), ("end", end)] {
        if let Some(value) = value {
            params.insert(key.to_string(), value);
        }
    }

    match state.handle(method, &params).await? {
        ProbeOutcome::Text { output } => println!("{}", output),
        ProbeOutcome::PortList { open_ports } if open_ports.is_empty() => {
            println!("No open ports found")
        }
        ProbeOutcome::PortList { open_ports } => {
            for port in open_ports {
                println!("{}/tcp open", port);
            }
        }
    }
    Ok(())
}
