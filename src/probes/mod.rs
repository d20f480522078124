// Probes module - single-shot network diagnostics with deadlines

pub mod command;
pub mod dns;
pub mod native;
pub mod ping;
pub mod traceroute;

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::{ProbeConfig, ProberKind};
use crate::error::{DiagError, DiagResult};

pub use command::SubprocessProber;
pub use dns::DnsExecutor;
pub use native::NativeProber;
pub use ping::PingExecutor;
pub use traceroute::TracerouteExecutor;

/// Something that can run ping and traceroute against a host.
///
/// Implementations return the diagnostic text in the order the probe
/// produced it. Deadlines are enforced by the executors, not here, so an
/// implementation must release its resources when its future is dropped.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn ping(&self, host: &str, count: u8) -> DiagResult<String>;

    async fn traceroute(&self, host: &str) -> DiagResult<String>;
}

/// Build the prober selected in the configuration
pub fn build_prober(config: &ProbeConfig) -> Arc<dyn Prober> {
    match config.prober {
        ProberKind::Subprocess => Arc::new(SubprocessProber::new(config)),
        ProberKind::Native => Arc::new(NativeProber::new(config)),
    }
}

/// Resolve a host name or IP literal to the first address the system resolver returns
pub async fn resolve_host(host: &str) -> DiagResult<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host(format!("{}:0", host))
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| addr.ip())
        .ok_or_else(|| DiagError::Resolution(host.to_string()))
}

/// Join probe output into one text block, keeping line order
pub(crate) fn normalize_output(raw: &str) -> String {
    raw.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}
