use crate::error::{Result, SelectorError};
use crate::progress::ProgressSink;
use crate::traits::DnsLookup;
use crate::types::{Candidate, IpVersion};
use async_trait::async_trait;
use hickory_resolver::config::{LookupIpStrategy, NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

// 单个域名解析的总超时
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves through one fixed name server instead of the system configuration.
pub struct HickoryLookup {
    resolver: TokioAsyncResolver,
}

impl HickoryLookup {
    pub fn new(server: SocketAddr, version: IpVersion) -> Self {
        let servers = NameServerConfigGroup::from_ips_clear(&[server.ip()], server.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], servers);

        let mut opts = ResolverOpts::default();
        opts.timeout = QUERY_TIMEOUT;
        opts.ip_strategy = match version {
            IpVersion::Ipv4 => LookupIpStrategy::Ipv4Only,
            IpVersion::Ipv6 => LookupIpStrategy::Ipv6Only,
            IpVersion::Both => LookupIpStrategy::Ipv4AndIpv6,
        };

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl DnsLookup for HickoryLookup {
    async fn lookup(&self, domain: &str) -> Result<Vec<IpAddr>> {
        match tokio::time::timeout(LOOKUP_TIMEOUT, self.resolver.lookup_ip(domain)).await {
            Err(_) => Err(SelectorError::DnsTimeout(domain.to_string())),
            Ok(Err(source)) => Err(SelectorError::Dns {
                domain: domain.to_string(),
                source,
            }),
            Ok(Ok(lookup)) => Ok(lookup.iter().collect()),
        }
    }
}

fn accepts(version: IpVersion, address: &IpAddr) -> bool {
    match version {
        IpVersion::Ipv4 => address.is_ipv4(),
        IpVersion::Ipv6 => address.is_ipv6(),
        IpVersion::Both => true,
    }
}

/// 并发解析所有域名
///
/// A failed domain contributes nothing and is logged. Returns once every
/// lookup has finished (or cancellation stopped the remaining ones).
pub async fn resolve_domains(
    domains: &[String],
    lookup: Arc<dyn DnsLookup>,
    limit: usize,
    version: IpVersion,
    cancel: &CancellationToken,
    progress: &ProgressSink,
) -> Vec<Candidate> {
    progress.emit(format!("Resolving {} domains...", domains.len()));

    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let found = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = JoinSet::new();

    for domain in domains.iter().cloned() {
        if cancel.is_cancelled() {
            break;
        }
        let semaphore = semaphore.clone();
        let found = found.clone();
        let lookup = lookup.clone();
        let cancel = cancel.clone();
        let progress = progress.clone();

        tasks.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                permit = semaphore.acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => return,
                },
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                r = lookup.lookup(&domain) => r,
            };

            match result {
                Ok(addresses) => {
                    tracing::debug!(%domain, count = addresses.len(), "resolved");
                    let mut found = found.lock().await;
                    found.extend(
                        addresses
                            .into_iter()
                            .filter(|a| accepts(version, a))
                            .map(|a| Candidate::new(a, &domain)),
                    );
                }
                Err(e) => {
                    tracing::warn!(%domain, error = %e, "domain resolution failed");
                    progress.emit(format!("Failed to resolve {}: {}", domain, e));
                }
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "resolver task panicked");
        }
    }

    let candidates = std::mem::take(&mut *found.lock().await);
    progress.emit(format!("All domains resolved: {} addresses found.", candidates.len()));
    candidates
}
