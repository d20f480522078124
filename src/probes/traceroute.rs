// Traceroute executor
//
// Runs a traceroute through the configured prober under a deadline and
// returns the hop listing as produced, line order untouched.

use std::sync::Arc;
use tokio::time::{Instant, timeout_at};

use super::Prober;
use crate::error::{DiagError, DiagResult};

/// A single hop line of traceroute output
#[derive(Debug, Clone, PartialEq)]
pub struct TracerouteHop {
    /// Hop number (1-based)
    pub hop_number: u32,
    /// First address that answered for this hop
    pub ip: Option<String>,
    /// Whether every probe for this hop went unanswered
    pub timed_out: bool,
}

pub struct TracerouteExecutor {
    prober: Arc<dyn Prober>,
}

impl TracerouteExecutor {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        TracerouteExecutor { prober }
    }

    pub async fn run(&self, target: &str, deadline: Instant) -> DiagResult<String> {
        tracing::debug!("traceroute to {}", target);

        let output = timeout_at(deadline, self.prober.traceroute(target))
            .await
            .map_err(|_| DiagError::Timeout(format!("traceroute to {}", target)))??;

        if output.trim().is_empty() {
            return Err(DiagError::Unreachable(format!(
                "traceroute to {} produced no output",
                target
            )));
        }
        Ok(output)
    }
}

/// Parse the hop lines of a Linux/macOS traceroute listing.
///
/// The header line and anything that does not start with a hop number are
/// skipped.
pub fn parse_hops(output: &str) -> Vec<TracerouteHop> {
    let mut hops = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();

        let hop_number: u32 = match parts.first().and_then(|s| s.parse().ok()) {
            Some(n) => n,
            None => continue,
        };

        // Format: " 1  192.168.1.1  1.234 ms  1.456 ms  1.678 ms"
        // or:     " 3  * * *"
        // or:     " 4  * 10.0.0.1  5.1 ms *"
        let ip = parts[1..]
            .iter()
            .find(|part| **part != "*" && part.parse::<f64>().is_err() && **part != "ms")
            .map(|s| s.to_string());

        hops.push(TracerouteHop {
            hop_number,
            timed_out: ip.is_none(),
            ip,
        });
    }

    hops
}
