// Configuration management for the diagnostics service
// Supports CLI arguments, config file (TOML), and environment variables

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Network diagnostics backend - ping, traceroute, DNS lookup and TCP port scan over HTTP
#[derive(Parser, Debug, Clone)]
#[command(name = "network-diagnostics")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Web server port
    #[arg(short, long, env = "NETDIAG_PORT")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(short, long, env = "NETDIAG_BIND")]
    pub bind: Option<String>,

    /// Base path the routes are mounted under (e.g. /api/diag)
    #[arg(long, env = "NETDIAG_BASE_PATH")]
    pub base_path: Option<String>,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(short, long, env = "NETDIAG_LOG")]
    pub log_level: Option<String>,

    /// Path to configuration file
    #[arg(short, long, env = "NETDIAG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Probe backend for ping/traceroute (subprocess, native)
    #[arg(long, env = "NETDIAG_PROBER")]
    pub prober: Option<ProberKind>,

    /// Maximum concurrent connect attempts per scan
    #[arg(long, env = "NETDIAG_SCAN_WORKERS")]
    pub scan_workers: Option<usize>,

    /// Largest accepted port range per scan
    #[arg(long, env = "NETDIAG_MAX_PORT_SPAN")]
    pub max_port_span: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Run a single diagnostic and print the result
    Probe {
        /// ping, traceroute, dns or scan
        method: String,
        /// Target host, IP or domain
        target: String,
        /// Echo requests to send (ping)
        #[arg(short = 'n', long)]
        count: Option<String>,
        /// First port (scan)
        #[arg(long)]
        start: Option<String>,
        /// Last port (scan)
        #[arg(long)]
        end: Option<String>,
    },
}

/// How ping and traceroute reach the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProberKind {
    /// Run the system `ping`/`traceroute` binaries
    Subprocess,
    /// Send ICMP from this process
    Native,
}

/// Upstream used by the DNS executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsUpstream {
    System,
    Google,
    Cloudflare,
    Quad9,
}

/// Configuration file structure (TOML format)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub probes: ProbeSection,

    #[serde(default)]
    pub scan: ScanSection,

    #[serde(default)]
    pub limits: LimitsSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Prefix for every route, empty for root
    #[serde(default)]
    pub base_path: String,

    /// Allow cross-origin requests from the UI
    #[serde(default = "default_true")]
    pub cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSection {
    #[serde(default = "default_prober")]
    pub prober: ProberKind,

    #[serde(default = "default_ping_binary")]
    pub ping_binary: String,

    #[serde(default = "default_traceroute_binary")]
    pub traceroute_binary: String,

    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_ms: u64,

    #[serde(default = "default_traceroute_timeout")]
    pub traceroute_timeout_ms: u64,

    #[serde(default = "default_dns_timeout")]
    pub dns_timeout_ms: u64,

    /// Wait for a single echo reply / traceroute probe
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,

    #[serde(default = "default_max_hops")]
    pub traceroute_max_hops: u8,

    #[serde(default = "default_dns_upstream")]
    pub dns_upstream: DnsUpstream,

    /// Add PTR records for forward lookups
    #[serde(default = "default_true")]
    pub dns_reverse: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSection {
    #[serde(default = "default_scan_workers")]
    pub workers: usize,

    #[serde(default = "default_port_timeout")]
    pub port_timeout_ms: u64,

    #[serde(default = "default_scan_deadline")]
    pub deadline_ms: u64,

    #[serde(default = "default_max_port_span")]
    pub max_port_span: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_ping_count")]
    pub default_ping_count: u8,

    #[serde(default = "default_max_ping_count")]
    pub max_ping_count: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_port() -> u16 {
    5001
}
fn default_true() -> bool {
    true
}
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_prober() -> ProberKind {
    ProberKind::Subprocess
}
fn default_ping_binary() -> String {
    "ping".to_string()
}
fn default_traceroute_binary() -> String {
    "traceroute".to_string()
}
fn default_ping_timeout() -> u64 {
    15_000
}
fn default_traceroute_timeout() -> u64 {
    60_000
}
fn default_dns_timeout() -> u64 {
    10_000
}
fn default_reply_timeout() -> u64 {
    2_000
}
fn default_max_hops() -> u8 {
    30
}
fn default_dns_upstream() -> DnsUpstream {
    DnsUpstream::Google
}
fn default_scan_workers() -> usize {
    500
}
fn default_port_timeout() -> u64 {
    1_000
}
fn default_scan_deadline() -> u64 {
    30_000
}
fn default_max_port_span() -> u16 {
    10_000
}
fn default_ping_count() -> u8 {
    4
}
fn default_max_ping_count() -> u8 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            port: default_port(),
            bind_address: default_bind_address(),
            base_path: String::new(),
            cors: default_true(),
        }
    }
}

impl Default for ProbeSection {
    fn default() -> Self {
        ProbeSection {
            prober: default_prober(),
            ping_binary: default_ping_binary(),
            traceroute_binary: default_traceroute_binary(),
            ping_timeout_ms: default_ping_timeout(),
            traceroute_timeout_ms: default_traceroute_timeout(),
            dns_timeout_ms: default_dns_timeout(),
            reply_timeout_ms: default_reply_timeout(),
            traceroute_max_hops: default_max_hops(),
            dns_upstream: default_dns_upstream(),
            dns_reverse: default_true(),
        }
    }
}

impl Default for ScanSection {
    fn default() -> Self {
        ScanSection {
            workers: default_scan_workers(),
            port_timeout_ms: default_port_timeout(),
            deadline_ms: default_scan_deadline(),
            max_port_span: default_max_port_span(),
        }
    }
}

impl Default for LimitsSection {
    fn default() -> Self {
        LimitsSection {
            default_ping_count: default_ping_count(),
            max_ping_count: default_max_ping_count(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        LoggingSection {
            level: default_log_level(),
        }
    }
}

/// Settings consumed by the ping, traceroute and DNS executors
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub prober: ProberKind,
    pub ping_binary: String,
    pub traceroute_binary: String,
    pub ping_timeout: Duration,
    pub traceroute_timeout: Duration,
    pub dns_timeout: Duration,
    pub reply_timeout: Duration,
    pub traceroute_max_hops: u8,
    pub dns_upstream: DnsUpstream,
    pub dns_reverse: bool,
}

/// Settings consumed by the port-scan coordinator
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub workers: usize,
    pub port_timeout: Duration,
    pub deadline: Duration,
    pub max_port_span: u16,
}

/// Bounds enforced by the request validator
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    pub default_ping_count: u8,
    pub max_ping_count: u8,
    pub max_port_span: u16,
}

/// Merged configuration from all sources
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub base_path: String,
    pub cors: bool,
    pub log_level: Level,
    pub probes: ProbeConfig,
    pub scan: ScanConfig,
    pub limits: LimitsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config::assemble(&CliArgs::default_empty(), ConfigFile::default(), Level::INFO)
    }
}

impl CliArgs {
    fn default_empty() -> Self {
        CliArgs {
            port: None,
            bind: None,
            base_path: None,
            log_level: None,
            config: None,
            prober: None,
            scan_workers: None,
            max_port_span: None,
            command: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources (CLI args, config file, defaults)
    /// Priority: CLI args > Environment variables > Config file > Defaults
    pub fn load(cli_args: &CliArgs) -> anyhow::Result<Self> {
        let config_file = if let Some(config_path) = &cli_args.config {
            let config_content = std::fs::read_to_string(config_path)?;
            toml::from_str::<ConfigFile>(&config_content)?
        } else {
            let default_path = PathBuf::from("netdiag.toml");
            if default_path.exists() {
                let config_content = std::fs::read_to_string(&default_path)?;
                toml::from_str::<ConfigFile>(&config_content)?
            } else {
                ConfigFile::default()
            }
        };

        Config::merge(cli_args, config_file)
    }

    fn merge(cli_args: &CliArgs, file: ConfigFile) -> anyhow::Result<Self> {
        let log_level =
            parse_log_level(cli_args.log_level.as_deref().unwrap_or(&file.logging.level))?;

        let workers = cli_args.scan_workers.unwrap_or(file.scan.workers);
        if workers == 0 {
            anyhow::bail!("scan workers must be at least 1");
        }
        if file.limits.max_ping_count == 0
            || file.limits.default_ping_count > file.limits.max_ping_count
        {
            anyhow::bail!(
                "invalid ping limits: default {} / max {}",
                file.limits.default_ping_count,
                file.limits.max_ping_count
            );
        }

        Ok(Config::assemble(cli_args, file, log_level))
    }

    fn assemble(cli_args: &CliArgs, file: ConfigFile, log_level: Level) -> Self {
        let base_path = normalize_base_path(
            cli_args
                .base_path
                .as_deref()
                .unwrap_or(&file.server.base_path),
        );
        let max_port_span = cli_args.max_port_span.unwrap_or(file.scan.max_port_span);

        Config {
            port: cli_args.port.unwrap_or(file.server.port),
            bind_address: cli_args
                .bind
                .clone()
                .unwrap_or(file.server.bind_address),
            base_path,
            cors: file.server.cors,
            log_level,
            probes: ProbeConfig {
                prober: cli_args.prober.unwrap_or(file.probes.prober),
                ping_binary: file.probes.ping_binary,
                traceroute_binary: file.probes.traceroute_binary,
                ping_timeout: Duration::from_millis(file.probes.ping_timeout_ms),
                traceroute_timeout: Duration::from_millis(file.probes.traceroute_timeout_ms),
                dns_timeout: Duration::from_millis(file.probes.dns_timeout_ms),
                reply_timeout: Duration::from_millis(file.probes.reply_timeout_ms),
                traceroute_max_hops: file.probes.traceroute_max_hops,
                dns_upstream: file.probes.dns_upstream,
                dns_reverse: file.probes.dns_reverse,
            },
            scan: ScanConfig {
                workers: cli_args.scan_workers.unwrap_or(file.scan.workers),
                port_timeout: Duration::from_millis(file.scan.port_timeout_ms),
                deadline: Duration::from_millis(file.scan.deadline_ms),
                max_port_span,
            },
            limits: LimitsConfig {
                default_ping_count: file.limits.default_ping_count,
                max_ping_count: file.limits.max_ping_count,
                max_port_span,
            },
        }
    }
}

/// "" and "/" mean root; anything else gets one leading and no trailing slash
fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

fn parse_log_level(level_str: &str) -> anyhow::Result<Level> {
    match level_str.to_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        _ => Err(anyhow::anyhow!("Invalid log level: {}", level_str)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 5001);
        assert_eq!(config.base_path, "");
        assert_eq!(config.probes.prober, ProberKind::Subprocess);
        assert_eq!(config.probes.dns_upstream, DnsUpstream::Google);
        assert_eq!(config.scan.workers, 500);
        assert_eq!(config.scan.max_port_span, 10_000);
        assert_eq!(config.limits.max_ping_count, 10);
        assert_eq!(config.limits.default_ping_count, 4);
    }

    #[test]
    fn test_parse_config_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            [server]
            port = 9000
            base_path = "/diag/"

            [probes]
            prober = "native"
            dns_upstream = "cloudflare"

            [scan]
            workers = 64
            port_timeout_ms = 250
            "#,
        )
        .unwrap();

        let config = Config::merge(&CliArgs::default_empty(), file).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.base_path, "/diag");
        assert_eq!(config.probes.prober, ProberKind::Native);
        assert_eq!(config.probes.dns_upstream, DnsUpstream::Cloudflare);
        assert_eq!(config.scan.workers, 64);
        assert_eq!(config.scan.port_timeout, Duration::from_millis(250));
        assert_eq!(config.scan.deadline, Duration::from_millis(30_000));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut cli = CliArgs::default_empty();
        cli.port = Some(7000);
        cli.scan_workers = Some(10);
        cli.max_port_span = Some(100);

        let config = Config::merge(&cli, ConfigFile::default()).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.scan.workers, 10);
        assert_eq!(config.limits.max_port_span, 100);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut cli = CliArgs::default_empty();
        cli.scan_workers = Some(0);
        assert!(Config::merge(&cli, ConfigFile::default()).is_err());
    }

    #[test]
    fn test_normalize_base_path() {
        assert_eq!(normalize_base_path(""), "");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path("api"), "/api");
        assert_eq!(normalize_base_path("/api/diag/"), "/api/diag");
    }

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("DEBUG"), Ok(Level::DEBUG)));
        assert!(parse_log_level("invalid").is_err());
    }
}
