// Native prober - ICMP echo from this process via surge-ping

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};

use super::{Prober, SubprocessProber, resolve_host};
use crate::config::ProbeConfig;
use crate::error::{DiagError, DiagResult};

const PAYLOAD_SIZE: usize = 56;
const PING_INTERVAL: Duration = Duration::from_secs(1);
const MIN_REPLY_WAIT: Duration = Duration::from_millis(100);
/// Slack kept between the last echo and the ping deadline
const DEADLINE_MARGIN: Duration = Duration::from_millis(500);

pub struct NativeProber {
    reply_timeout: Duration,
    /// Whole-run budget the echoes and the gaps between them must fit in
    run_budget: Duration,
    /// No native TTL walk, traceroute goes through the system binary
    traceroute: SubprocessProber,
}

impl NativeProber {
    pub fn new(config: &ProbeConfig) -> Self {
        NativeProber {
            reply_timeout: config.reply_timeout,
            run_budget: config.ping_timeout.saturating_sub(DEADLINE_MARGIN),
            traceroute: SubprocessProber::new(config),
        }
    }
}

#[async_trait]
impl Prober for NativeProber {
    async fn ping(&self, host: &str, count: u8) -> DiagResult<String> {
        let address = resolve_host(host).await?;

        let config = match address {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };

        // Unprivileged ICMP sockets need ping_group_range or CAP_NET_RAW
        let client = Client::new(&config).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => DiagError::Permission(format!(
                "cannot open ICMP socket ({}); grant CAP_NET_RAW or use the subprocess prober",
                e
            )),
            _ => DiagError::Internal(format!("Failed to create ping client: {}", e)),
        })?;

        let payload = [0; PAYLOAD_SIZE];
        let mut pinger = client.pinger(address, PingIdentifier(rand::random())).await;
        pinger.timeout(reply_wait(self.reply_timeout, self.run_budget, count));

        let mut lines = vec![format!(
            "PING {} ({}) {} data bytes",
            host, address, PAYLOAD_SIZE
        )];
        let mut rtts = Vec::with_capacity(count as usize);

        for seq in 0..count {
            match pinger.ping(PingSequence(seq as u16), &payload).await {
                Ok((_, rtt)) => {
                    let ms = rtt.as_secs_f64() * 1000.0;
                    rtts.push(ms);
                    lines.push(format!(
                        "reply from {}: icmp_seq={} time={:.3} ms",
                        address, seq, ms
                    ));
                }
                Err(SurgeError::Timeout { .. }) => {
                    lines.push(format!("request timeout for icmp_seq={}", seq));
                }
                Err(SurgeError::IOError(e)) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    return Err(DiagError::Permission(format!("ICMP send refused: {}", e)));
                }
                Err(e) => {
                    tracing::debug!("Ping failed for {}: {}", address, e);
                    lines.push(format!("icmp_seq={} failed: {}", seq, e));
                }
            }

            if seq + 1 < count {
                tokio::time::sleep(PING_INTERVAL).await;
            }
        }

        if rtts.is_empty() {
            return Err(DiagError::Unreachable(format!("no reply from {}", host)));
        }

        lines.push(String::new());
        lines.push(format!("--- {} ping statistics ---", host));
        lines.push(summary_line(count, &rtts));
        Ok(lines.join("\n"))
    }

    async fn traceroute(&self, host: &str) -> DiagResult<String> {
        self.traceroute.traceroute(host).await
    }
}

/// Per-echo wait so that `count` unanswered echoes plus the intervals
/// between them end within `budget`. Never longer than `reply_timeout`.
fn reply_wait(reply_timeout: Duration, budget: Duration, count: u8) -> Duration {
    let count = u32::from(count.max(1));
    let gaps = PING_INTERVAL * (count - 1);
    let per_reply = budget.saturating_sub(gaps) / count;
    reply_timeout.min(per_reply).max(MIN_REPLY_WAIT)
}

fn summary_line(sent: u8, rtts: &[f64]) -> String {
    let received = rtts.len();
    let loss = if sent == 0 {
        0.0
    } else {
        100.0 * (sent as f64 - received as f64) / sent as f64
    };
    let mut line = format!(
        "{} packets transmitted, {} received, {:.0}% packet loss",
        sent, received, loss
    );

    if !rtts.is_empty() {
        let min = rtts.iter().copied().fold(f64::INFINITY, f64::min);
        let max = rtts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = rtts.iter().sum::<f64>() / received as f64;
        line.push_str(&format!("\nrtt min/avg/max = {:.3}/{:.3}/{:.3} ms", min, avg, max));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_line() {
        let line = summary_line(4, &[1.0, 2.0, 3.0]);
        assert!(line.starts_with("4 packets transmitted, 3 received, 25% packet loss"));
        assert!(line.ends_with("rtt min/avg/max = 1.000/2.000/3.000 ms"));
    }

    #[test]
    fn test_reply_wait_fits_ping_deadline() {
        let reply = Duration::from_secs(2);
        let budget = Duration::from_secs(15) - DEADLINE_MARGIN;

        assert_eq!(reply_wait(reply, budget, 4), reply);
        assert_eq!(reply_wait(reply, budget, 10), Duration::from_millis(550));

        for count in 1..=10u8 {
            let wait = reply_wait(reply, budget, count);
            let worst = wait * count as u32 + PING_INTERVAL * (count as u32 - 1);
            assert!(worst <= budget, "count {} takes {:?}", count, worst);
        }

        assert_eq!(reply_wait(reply, Duration::ZERO, 3), MIN_REPLY_WAIT);
    }

    #[test]
    fn test_summary_line_all_lost() {
        let line = summary_line(2, &[]);
        assert_eq!(line, "2 packets transmitted, 0 received, 100% packet loss");
    }

    #[tokio::test]
    #[ignore]
    async fn test_native_ping_loopback() {
        let prober = NativeProber::new(&crate::config::Config::default().probes);
        match prober.ping("127.0.0.1", 1).await {
            Ok(out) => assert!(out.contains("1 received")),
            Err(DiagError::Permission(_)) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
}
