//! DNS resolution pinned to a fixed nameserver
//!
//! The proxy is usually installed as the network's DNS target, so resolving
//! upstream hosts through the system resolver would point straight back at
//! the proxy. Upstream lookups therefore go to an explicitly configured
//! nameserver.

use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Timeout of a single DNS query
pub const DNS_TIMEOUT: Duration = Duration::from_secs(5);

/// reqwest resolver that only asks one nameserver
#[derive(Clone)]
pub struct PinnedResolver {
    nameserver: SocketAddr,
    resolver: Arc<TokioAsyncResolver>,
}

impl PinnedResolver {
    /// Create a resolver querying `nameserver` over UDP (falling back to TCP)
    pub fn new(nameserver: SocketAddr) -> Self {
        let group = NameServerConfigGroup::from_ips_clear(&[nameserver.ip()], nameserver.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], group);

        let mut opts = ResolverOpts::default();
        opts.timeout = DNS_TIMEOUT;

        PinnedResolver {
            nameserver,
            resolver: Arc::new(TokioAsyncResolver::tokio(config, opts)),
        }
    }

    /// The nameserver every lookup is sent to
    pub fn nameserver(&self) -> SocketAddr {
        self.nameserver
    }
}

impl Resolve for PinnedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = Arc::clone(&self.resolver);
        let nameserver = self.nameserver;
        Box::pin(async move {
            let host = name.as_str().to_string();
            let lookup = resolver.lookup_ip(host.as_str()).await?;
            let addrs: Vec<SocketAddr> = lookup.iter().map(|ip| SocketAddr::new(ip, 0)).collect();
            debug!("Resolved {} via {} to {:?}", host, nameserver, addrs);
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}
