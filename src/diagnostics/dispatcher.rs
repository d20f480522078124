// Dispatcher - routes a validated request to its executor

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{DiagnosticRequest, Method, ProbeOutcome};
use crate::config::Config;
use crate::error::{DiagError, DiagResult};
use crate::probes::{DnsExecutor, PingExecutor, Prober, TracerouteExecutor, build_prober};
use crate::scan::{PortConnector, ScanCoordinator, TcpConnector};

pub struct Dispatcher {
    ping: PingExecutor,
    traceroute: TracerouteExecutor,
    dns: DnsExecutor,
    scan: ScanCoordinator,
    ping_timeout: Duration,
    traceroute_timeout: Duration,
    dns_timeout: Duration,
    scan_deadline: Duration,
}

impl Dispatcher {
    /// Dispatcher backed by the configured prober and real TCP connects
    pub fn from_config(config: &Config) -> DiagResult<Self> {
        Dispatcher::new(
            config,
            build_prober(&config.probes),
            Arc::new(TcpConnector),
        )
    }

    pub fn new(
        config: &Config,
        prober: Arc<dyn Prober>,
        connector: Arc<dyn PortConnector>,
    ) -> DiagResult<Self> {
        Ok(Dispatcher {
            ping: PingExecutor::new(prober.clone()),
            traceroute: TracerouteExecutor::new(prober),
            dns: DnsExecutor::new(&config.probes)?,
            scan: ScanCoordinator::new(&config.scan, connector),
            ping_timeout: config.probes.ping_timeout,
            traceroute_timeout: config.probes.traceroute_timeout,
            dns_timeout: config.probes.dns_timeout,
            scan_deadline: config.scan.deadline,
        })
    }

    /// Run the request and shape its result.
    ///
    /// The deadline starts when dispatch starts and covers the whole probe.
    pub async fn dispatch(&self, request: &DiagnosticRequest) -> DiagResult<ProbeOutcome> {
        let started = Instant::now();
        let target = request.target.as_str();

        let outcome = match request.method {
            Method::Ping => {
                let count = request
                    .count
                    .ok_or_else(|| DiagError::missing("count"))?;
                let output = self
                    .ping
                    .run(target, count, started + self.ping_timeout)
                    .await?;
                ProbeOutcome::Text { output }
            }
            Method::Traceroute => {
                let output = self
                    .traceroute
                    .run(target, started + self.traceroute_timeout)
                    .await?;
                ProbeOutcome::Text { output }
            }
            Method::Dns => {
                let output = self.dns.run(target, started + self.dns_timeout).await?;
                ProbeOutcome::Text { output }
            }
            Method::Scan => {
                let (start, end) = match (request.port_start, request.port_end) {
                    (Some(start), Some(end)) => (start, end),
                    (None, _) => return Err(DiagError::missing("start")),
                    (_, None) => return Err(DiagError::missing("end")),
                };
                let open_ports = self
                    .scan
                    .scan(target, start, end, started + self.scan_deadline)
                    .await?;
                ProbeOutcome::PortList { open_ports }
            }
        };

        tracing::debug!(
            "{} {} completed in {:?}",
            request.method,
            target,
            started.elapsed()
        );
        Ok(outcome)
    }
}
