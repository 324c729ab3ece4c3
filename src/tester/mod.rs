pub mod colo;
pub mod httping;
pub mod speedtest;

use crate::error::{Result, SelectorError};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

pub use httping::HttpPing;
pub use speedtest::DownloadTester;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_12_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/98.0.4758.80 Safari/537.36";

/// 所有域名都解析到同一个候选 IP
///
/// Port 0 lets the connector fill in the port of the URL being dialed, so
/// redirects to another host or port still land on `address`.
struct PinnedResolver {
    address: IpAddr,
}

impl Resolve for PinnedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        tracing::trace!(host = name.as_str(), address = %self.address, "pinned dial");
        let addrs: Addrs = Box::new(std::iter::once(SocketAddr::new(self.address, 0)));
        Box::pin(futures::future::ready(Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)))
    }
}

/// Builds a client whose every connection, including those made while
/// following redirects, goes to `address` whatever DNS says about the host.
pub(crate) fn pinned_client(
    address: IpAddr,
    url: &str,
    timeout: Duration,
    redirect: Policy,
) -> Result<Client> {
    let parsed = Url::parse(url).map_err(|e| SelectorError::InvalidUrl(format!("{url}: {e}")))?;
    if parsed.host_str().is_none() {
        return Err(SelectorError::InvalidUrl(format!("{url}: missing host")));
    }

    let client = Client::builder()
        .timeout(timeout)
        .redirect(redirect)
        .user_agent(USER_AGENT)
        .no_proxy()
        .dns_resolver(Arc::new(PinnedResolver { address }))
        .build()?;
    Ok(client)
}
