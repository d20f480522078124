// Port-scan coordinator
//
// Fans a port range out over a fixed pool of workers and gathers the
// results under one overall deadline.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};

use super::{PortConnector, PortError, ScanResult, ScanTask};
use crate::config::ScanConfig;
use crate::error::{DiagError, DiagResult};
use crate::probes::resolve_host;

pub struct ScanCoordinator {
    connector: Arc<dyn PortConnector>,
    workers: usize,
    port_timeout: Duration,
    max_port_span: u16,
}

#[derive(Debug, Default)]
struct ScanTally {
    open: usize,
    refused: usize,
    timed_out: usize,
    failed: usize,
}

impl ScanCoordinator {
    pub fn new(config: &ScanConfig, connector: Arc<dyn PortConnector>) -> Self {
        ScanCoordinator {
            connector,
            workers: config.workers.max(1),
            port_timeout: config.port_timeout,
            max_port_span: config.max_port_span,
        }
    }

    /// Workers used for a range of `range_len` ports
    pub fn pool_size(&self, range_len: usize) -> usize {
        range_len.clamp(1, self.workers)
    }

    /// Scan `[start, end]` on `target` and return the open ports in ascending order.
    ///
    /// Ports still in flight when `deadline` passes are left out of the
    /// result. Only a failure to resolve the target fails the scan.
    pub async fn scan(
        &self,
        target: &str,
        start: u16,
        end: u16,
        deadline: Instant,
    ) -> DiagResult<Vec<u16>> {
        if start == 0 || start > end {
            return Err(DiagError::validation(
                "start",
                format!("invalid port range {}-{}", start, end),
            ));
        }
        if end - start > self.max_port_span {
            return Err(DiagError::validation(
                "end",
                format!(
                    "port range {}-{} exceeds the maximum span of {}",
                    start, end, self.max_port_span
                ),
            ));
        }

        let ip = timeout_at(deadline, resolve_host(target))
            .await
            .map_err(|_| DiagError::Timeout(format!("resolving {}", target)))??;

        let queue: VecDeque<ScanTask> = (start..=end).map(|port| ScanTask { port }).collect();
        let total = queue.len();
        let pool_size = self.pool_size(total);

        tracing::info!(
            "Scanning {} ({}) ports {}-{} with {} workers",
            target,
            ip,
            start,
            end,
            pool_size
        );

        let open = self.run_pool(ip, queue, pool_size, deadline).await;
        Ok(open)
    }

    async fn run_pool(
        &self,
        ip: IpAddr,
        queue: VecDeque<ScanTask>,
        pool_size: usize,
        deadline: Instant,
    ) -> Vec<u16> {
        let total = queue.len();
        let queue = Arc::new(Mutex::new(queue));
        let (tx, mut rx) = mpsc::channel::<ScanResult>(pool_size);
        let mut pool = JoinSet::new();

        for _ in 0..pool_size {
            let queue = queue.clone();
            let tx = tx.clone();
            let connector = self.connector.clone();
            let port_timeout = self.port_timeout;

            pool.spawn(async move {
                loop {
                    // Each task is popped exactly once
                    let task = queue.lock().await.pop_front();
                    let Some(task) = task else { break };

                    let result = connector
                        .probe(SocketAddr::new(ip, task.port), port_timeout)
                        .await;
                    if tx.send(result).await.is_err() {
                        break;
                    }
                }
            });
        }
        // Channel closes once every worker has finished
        drop(tx);

        let mut open_ports = Vec::new();
        let mut tally = ScanTally::default();
        let mut received = 0;

        loop {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(result)) => {
                    received += 1;
                    if result.open {
                        tally.open += 1;
                        open_ports.push(result.port);
                        continue;
                    }
                    match result.error {
                        Some(PortError::Refused) => tally.refused += 1,
                        Some(PortError::TimedOut) => tally.timed_out += 1,
                        Some(PortError::Unreachable) | Some(PortError::Other(_)) | None => {
                            tally.failed += 1
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Scan deadline reached with {} of {} ports unresolved",
                        total - received,
                        total
                    );
                    break;
                }
            }
        }

        // Stop stragglers; anything they would still report is discarded
        rx.close();
        pool.shutdown().await;

        tracing::info!(
            "Scan of {} finished: {} open, {} refused, {} timed out, {} failed, {} abandoned",
            ip,
            tally.open,
            tally.refused,
            tally.timed_out,
            tally.failed,
            total - received
        );

        open_ports.sort_unstable();
        open_ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener;

    /// Records every probed port; ports in `open` answer, ports in `slow` hang
    struct FakeConnector {
        open: HashSet<u16>,
        slow: HashSet<u16>,
        delay: Duration,
        seen: StdMutex<Vec<u16>>,
    }

    impl FakeConnector {
        fn new(open: &[u16], slow: &[u16]) -> Self {
            FakeConnector {
                open: open.iter().copied().collect(),
                slow: slow.iter().copied().collect(),
                delay: Duration::ZERO,
                seen: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PortConnector for FakeConnector {
        async fn probe(&self, addr: SocketAddr, _timeout: Duration) -> ScanResult {
            let port = addr.port();
            self.seen.lock().unwrap().push(port);

            if self.slow.contains(&port) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            } else if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            if self.open.contains(&port) {
                ScanResult::open(port)
            } else {
                ScanResult::closed(port, PortError::Refused)
            }
        }
    }

    fn coordinator(connector: Arc<dyn PortConnector>, workers: usize) -> ScanCoordinator {
        let mut config = Config::default().scan;
        config.workers = workers;
        config.max_port_span = u16::MAX;
        ScanCoordinator::new(&config, connector)
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[tokio::test]
    async fn test_open_ports_sorted_and_in_range() {
        let mut fake = FakeConnector::new(&[90, 22, 1, 100, 55], &[]);
        fake.delay = Duration::from_millis(1);
        let scanner = coordinator(Arc::new(fake), 16);

        let open = scanner.scan("127.0.0.1", 1, 100, far_deadline()).await.unwrap();
        assert_eq!(open, vec![1, 22, 55, 90, 100]);
    }

    #[tokio::test]
    async fn test_every_port_probed_exactly_once() {
        let connector = Arc::new(FakeConnector::new(&[], &[]));
        let scanner = coordinator(connector.clone(), 7);

        let open = scanner.scan("127.0.0.1", 1000, 1999, far_deadline()).await.unwrap();
        assert!(open.is_empty());

        let mut seen = connector.seen.lock().unwrap().clone();
        seen.sort_unstable();
        let expected: Vec<u16> = (1000..=1999).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_deadline_drops_abandoned_ports() {
        // Port 22 is open but its worker never finishes before the deadline
        let connector = Arc::new(FakeConnector::new(&[22, 80], &[22]));
        let scanner = coordinator(connector, 4);

        let started = std::time::Instant::now();
        let deadline = Instant::now() + Duration::from_millis(200);
        let open = scanner.scan("127.0.0.1", 20, 90, deadline).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(open, vec![80]);
    }

    #[tokio::test]
    async fn test_span_cap_enforced() {
        let mut config = Config::default().scan;
        config.max_port_span = 100;
        let scanner = ScanCoordinator::new(&config, Arc::new(FakeConnector::new(&[], &[])));

        let err = scanner.scan("127.0.0.1", 1, 200, far_deadline()).await.unwrap_err();
        assert!(matches!(err, DiagError::Validation { field: "end", .. }));

        let err = scanner.scan("127.0.0.1", 50, 10, far_deadline()).await.unwrap_err();
        assert!(matches!(err, DiagError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_pool_size_capped() {
        let scanner = coordinator(Arc::new(FakeConnector::new(&[], &[])), 500);
        assert_eq!(scanner.pool_size(10), 10);
        assert_eq!(scanner.pool_size(10_000), 500);
        assert_eq!(scanner.pool_size(0), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_host_fails_scan() {
        let scanner = coordinator(Arc::new(FakeConnector::new(&[], &[])), 4);
        let err = scanner
            .scan("nonexistent.invalid", 1, 10, far_deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, DiagError::Resolution(_) | DiagError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_real_loopback_scan() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let start = port.saturating_sub(10).max(1);
        let end = port.saturating_add(10);

        let scanner = coordinator(Arc::new(crate::scan::TcpConnector), 8);
        let first = scanner.scan("127.0.0.1", start, end, far_deadline()).await.unwrap();
        let second = scanner.scan("127.0.0.1", start, end, far_deadline()).await.unwrap();

        assert!(first.contains(&port));
        assert!(second.contains(&port));
        assert!(first.windows(2).all(|w| w[0] < w[1]));
        assert!(first.iter().all(|p| (start..=end).contains(p)));
    }
}
