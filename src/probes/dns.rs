// DNS executor - forward and reverse lookups with a stable rendering

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};

use crate::config::{DnsUpstream, ProbeConfig};
use crate::error::{DiagError, DiagResult};

const RESOLVER_ATTEMPTS: usize = 2;

pub struct DnsExecutor {
    resolver: TokioAsyncResolver,
    upstream: DnsUpstream,
    reverse: bool,
    /// Longest a PTR enrichment may take after the forward lookup
    reverse_budget: Duration,
}

impl DnsExecutor {
    pub fn new(config: &ProbeConfig) -> DiagResult<Self> {
        let mut opts = ResolverOpts::default();
        opts.timeout = config.reply_timeout;
        opts.attempts = RESOLVER_ATTEMPTS;

        let resolver = match config.dns_upstream {
            DnsUpstream::System => TokioAsyncResolver::tokio_from_system_conf(),
            DnsUpstream::Google => TokioAsyncResolver::tokio(ResolverConfig::google(), opts),
            DnsUpstream::Cloudflare => {
                TokioAsyncResolver::tokio(ResolverConfig::cloudflare(), opts)
            }
            DnsUpstream::Quad9 => TokioAsyncResolver::tokio(ResolverConfig::quad9(), opts),
        }
        .map_err(|e| DiagError::Internal(format!("Failed to create resolver: {}", e)))?;

        Ok(DnsExecutor {
            resolver,
            upstream: config.dns_upstream,
            reverse: config.dns_reverse,
            reverse_budget: config.reply_timeout * RESOLVER_ATTEMPTS as u32,
        })
    }

    /// Look up `target`, giving up at `deadline`.
    ///
    /// A host name gets a forward lookup (plus PTR records when enabled),
    /// an IP literal gets a reverse lookup only.
    pub async fn run(&self, target: &str, deadline: Instant) -> DiagResult<String> {
        tracing::debug!("dns lookup {} via {:?}", target, self.upstream);

        timeout_at(deadline, self.lookup(target, deadline))
            .await
            .map_err(|_| DiagError::Timeout(format!("DNS lookup of {}", target)))?
    }

    async fn lookup(&self, target: &str, deadline: Instant) -> DiagResult<String> {
        if let Ok(ip) = target.parse::<IpAddr>() {
            let names = self
                .resolver
                .reverse_lookup(ip)
                .await
                .map_err(|e| map_resolve_error(target, e))?
                .iter()
                .map(|name| name.to_string())
                .collect::<Vec<_>>();

            let mut ptrs = BTreeMap::new();
            ptrs.insert(ip, names);
            return Ok(render_lookup(target, self.upstream, &[], &ptrs));
        }

        let addresses: Vec<IpAddr> = self
            .resolver
            .lookup_ip(target)
            .await
            .map_err(|e| map_resolve_error(target, e))?
            .iter()
            .collect();

        if addresses.is_empty() {
            return Err(DiagError::Resolution(target.to_string()));
        }

        let ptrs = if self.reverse {
            let resolver = self.resolver.clone();
            let cutoff = reverse_deadline(Instant::now(), deadline, self.reverse_budget);
            gather_reverse(&addresses, cutoff, move |ip| {
                let resolver = resolver.clone();
                async move {
                    match resolver.reverse_lookup(ip).await {
                        Ok(lookup) => {
                            Some(lookup.iter().map(|name| name.to_string()).collect::<Vec<_>>())
                        }
                        Err(e) => {
                            tracing::debug!("No PTR for {}: {}", ip, e);
                            None
                        }
                    }
                }
            })
            .await
        } else {
            BTreeMap::new()
        };

        Ok(render_lookup(target, self.upstream, &addresses, &ptrs))
    }
}

/// PTR lookups get half of what is left of the request, capped at `budget`,
/// so the forward answer always has time to be returned.
fn reverse_deadline(now: Instant, deadline: Instant, budget: Duration) -> Instant {
    let remaining = deadline.saturating_duration_since(now);
    now + budget.min(remaining / 2)
}

/// Run one reverse lookup per distinct address concurrently.
///
/// Lookups still pending at `deadline` are aborted and their address is
/// rendered without names.
async fn gather_reverse<F, Fut>(
    addresses: &[IpAddr],
    deadline: Instant,
    lookup: F,
) -> BTreeMap<IpAddr, Vec<String>>
where
    F: Fn(IpAddr) -> Fut,
    Fut: Future<Output = Option<Vec<String>>> + Send + 'static,
{
    let mut pending = JoinSet::new();
    for ip in addresses.iter().copied().collect::<BTreeSet<_>>() {
        let lookup = lookup(ip);
        pending.spawn(async move { (ip, lookup.await) });
    }

    let mut ptrs = BTreeMap::new();
    loop {
        match timeout_at(deadline, pending.join_next()).await {
            Ok(Some(Ok((ip, Some(names))))) => {
                ptrs.insert(ip, names);
            }
            Ok(Some(Ok((_, None)))) => {}
            Ok(Some(Err(e))) => tracing::debug!("PTR lookup task failed: {}", e),
            Ok(None) => break,
            Err(_) => {
                tracing::debug!("Dropping {} unfinished PTR lookups", pending.len());
                pending.abort_all();
                break;
            }
        }
    }
    ptrs
}

fn map_resolve_error(target: &str, error: ResolveError) -> DiagError {
    match error.kind() {
        ResolveErrorKind::Timeout => DiagError::Timeout(format!("DNS lookup of {}", target)),
        ResolveErrorKind::NoRecordsFound { .. } => DiagError::Resolution(target.to_string()),
        ResolveErrorKind::NoConnections | ResolveErrorKind::Io(_) => {
            DiagError::Unreachable(format!("DNS server for {}: {}", target, error))
        }
        _ => DiagError::Resolution(format!("{} ({})", target, error)),
    }
}

fn upstream_label(upstream: DnsUpstream) -> &'static str {
    match upstream {
        DnsUpstream::System => "system resolver",
        DnsUpstream::Google => "8.8.8.8 (google)",
        DnsUpstream::Cloudflare => "1.1.1.1 (cloudflare)",
        DnsUpstream::Quad9 => "9.9.9.9 (quad9)",
    }
}

/// Render a lookup result. Addresses and names are sorted and deduplicated
/// so repeated lookups of a stable name yield identical text.
fn render_lookup(
    name: &str,
    upstream: DnsUpstream,
    addresses: &[IpAddr],
    ptrs: &BTreeMap<IpAddr, Vec<String>>,
) -> String {
    let mut lines = vec![
        format!("Server:  {}", upstream_label(upstream)),
        format!("Name:    {}", name),
    ];

    let sorted: BTreeSet<&IpAddr> = addresses.iter().collect();
    if !sorted.is_empty() {
        lines.push("Addresses:".to_string());
        lines.extend(sorted.iter().map(|ip| format!("  {}", ip)));
    }

    let reverse: Vec<String> = ptrs
        .iter()
        .flat_map(|(ip, names)| {
            names
                .iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(move |n| format!("  {} -> {}", ip, n))
        })
        .collect();
    if !reverse.is_empty() {
        lines.push("Reverse:".to_string());
        lines.extend(reverse);
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_sorted_and_deduplicated() {
        let a: IpAddr = "93.184.216.34".parse().unwrap();
        let b: IpAddr = "2606:2800:220:1::1".parse().unwrap();
        let c: IpAddr = "10.0.0.1".parse().unwrap();

        let mut ptrs = BTreeMap::new();
        ptrs.insert(a, vec!["z.example.".to_string(), "a.example.".to_string()]);

        let first = render_lookup("example.com", DnsUpstream::Google, &[a, b, c, a], &ptrs);
        let second = render_lookup("example.com", DnsUpstream::Google, &[c, a, b], &ptrs);
        assert_eq!(first, second);

        let expected = "Server:  8.8.8.8 (google)\n\
                        Name:    example.com\n\
                        Addresses:\n  \
                        10.0.0.1\n  \
                        93.184.216.34\n  \
                        2606:2800:220:1::1\n\
                        Reverse:\n  \
                        93.184.216.34 -> a.example.\n  \
                        93.184.216.34 -> z.example.";
        assert_eq!(first, expected);
    }

    #[test]
    fn test_render_reverse_only() {
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        let mut ptrs = BTreeMap::new();
        ptrs.insert(ip, vec!["dns.google.".to_string()]);

        let out = render_lookup("8.8.8.8", DnsUpstream::Cloudflare, &[], &ptrs);
        assert!(!out.contains("Addresses:"));
        assert!(out.ends_with("Reverse:\n  8.8.8.8 -> dns.google."));
    }

    #[test]
    fn test_missing_records_map_to_resolution() {
        use trust_dns_resolver::proto::op::{Query, ResponseCode};
        use trust_dns_resolver::proto::rr::{Name, RecordType};

        let query = Query::query(
            Name::from_ascii("nonexistent.invalid.").unwrap(),
            RecordType::A,
        );
        let error = ResolveError::from(ResolveErrorKind::NoRecordsFound {
            query: Box::new(query),
            soa: None,
            negative_ttl: None,
            response_code: ResponseCode::NXDomain,
            trusted: true,
        });

        let err = map_resolve_error("nonexistent.invalid", error);
        assert_eq!(err, DiagError::Resolution("nonexistent.invalid".to_string()));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_resolver_timeout_maps_to_504() {
        let err = map_resolve_error("example.com", ResolveError::from(ResolveErrorKind::Timeout));
        assert!(matches!(err, DiagError::Timeout(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_no_connections_maps_to_unreachable() {
        let err = map_resolve_error(
            "example.com",
            ResolveError::from(ResolveErrorKind::NoConnections),
        );
        assert!(matches!(err, DiagError::Unreachable(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_reverse_deadline_leaves_room_for_forward_answer() {
        let now = Instant::now();
        let deadline = now + Duration::from_secs(10);

        assert_eq!(
            reverse_deadline(now, deadline, Duration::from_secs(4)),
            now + Duration::from_secs(4)
        );
        assert_eq!(
            reverse_deadline(now, deadline, Duration::from_secs(30)),
            now + Duration::from_secs(5)
        );
        assert_eq!(reverse_deadline(deadline, now, Duration::from_secs(4)), deadline);
    }

    #[tokio::test]
    async fn test_slow_reverse_lookup_is_dropped() {
        let fast: IpAddr = "93.184.216.34".parse().unwrap();
        let slow: IpAddr = "10.0.0.1".parse().unwrap();
        let deadline = Instant::now() + Duration::from_millis(200);

        let started = Instant::now();
        let ptrs = gather_reverse(&[slow, fast, fast], deadline, move |ip| async move {
            if ip == slow {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Some(vec![format!("host-{}.example.", ip)])
        })
        .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(ptrs.len(), 1);
        assert_eq!(ptrs[&fast], vec!["host-93.184.216.34.example.".to_string()]);

        let out = render_lookup("example.com", DnsUpstream::Google, &[slow, fast], &ptrs);
        assert!(out.contains("  10.0.0.1\n"));
        assert!(!out.contains("10.0.0.1 ->"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_nonexistent_domain_is_resolution_error() {
        let executor = DnsExecutor::new(&crate::config::Config::default().probes).unwrap();
        let deadline = Instant::now() + std::time::Duration::from_secs(10);
        let err = executor.run("nonexistent.invalid", deadline).await.unwrap_err();
        assert!(matches!(err, DiagError::Resolution(_)));
    }
}
