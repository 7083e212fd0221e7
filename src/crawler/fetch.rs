use std::error::Error as StdError;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::async_trait;
use hyper::client::connect::dns::Name;
use reqwest::dns::{Addrs, Resolve, Resolving};
use reqwest::{redirect, Client as ReqwestClient, Response};
use url::{Host, Url};

use super::CrawlError;

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
pub const MAX_REDIRECTS: usize = 5;
pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; HoarderCrawler/1.0)";

/// A fetched page: the URL it was finally served from and its body text.
/// `html` is empty for non-HTML responses.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: Url,
    pub html: String,
}

/// Source of page bodies for the crawler.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, CrawlError>;
}

/// Returns `true` if `ip` is a private, loopback, link-local or unspecified
/// address.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            matches!(
                o,
                [127, ..]
                    | [10, ..]
                    | [169, 254, ..]
                    | [192, 168, ..]
                    | [0, ..]
                    | [255, 255, 255, 255]
            ) || (o[0] == 172 && (16..=31).contains(&o[1]))
                || (o[0] == 100 && (64..=127).contains(&o[1]))
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_ip(IpAddr::V4(mapped));
            }
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00 == 0xfc00)
                || (v6.segments()[0] & 0xffc0 == 0xfe80)
        }
    }
}

/// Parse `raw` and check it is an http(s) URL with a host.
pub fn parse_target(raw: &str) -> Result<Url, CrawlError> {
    let url = Url::parse(raw).map_err(|_| CrawlError::InvalidUrl(raw.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(CrawlError::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().is_none() {
        return Err(CrawlError::InvalidUrl(raw.to_string()));
    }
    Ok(url)
}

fn literal_private_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(v4)) => is_private_ip(IpAddr::V4(v4)),
        Some(Host::Ipv6(v6)) => is_private_ip(IpAddr::V6(v6)),
        _ => false,
    }
}

/// Resolve `host` and refuse it if any address is private.
pub async fn resolve_public(host: &str) -> Result<Vec<SocketAddr>, CrawlError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| CrawlError::Resolve(format!("{host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(CrawlError::Resolve(format!("{host}: no addresses")));
    }
    if addrs.iter().any(|addr| is_private_ip(addr.ip())) {
        return Err(CrawlError::PrivateAddress(host.to_string()));
    }
    Ok(addrs)
}

/// DNS resolver for the crawl client. Every connection reqwest opens,
/// redirect hops included, resolves through here, so the address that gets
/// connected to is the one that was checked.
struct PublicOnlyResolver;

impl Resolve for PublicOnlyResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let result: Result<Addrs, Box<dyn StdError + Send + Sync>> =
                match resolve_public(name.as_str()).await {
                    Ok(addrs) => Ok(Box::new(addrs.into_iter()) as Addrs),
                    Err(e) => Err(Box::new(e) as Box<dyn StdError + Send + Sync>),
                };
            result
        })
    }
}

/// Recover a guard rejection from inside a reqwest error; anything else
/// stays a transport error.
fn classify(err: reqwest::Error) -> CrawlError {
    let mut source = err.source();
    while let Some(cause) = source {
        match cause.downcast_ref::<CrawlError>() {
            Some(CrawlError::PrivateAddress(host)) => {
                return CrawlError::PrivateAddress(host.clone())
            }
            Some(CrawlError::Resolve(msg)) => return CrawlError::Resolve(msg.clone()),
            _ => source = cause.source(),
        }
    }
    CrawlError::Http(err)
}

/// Check the status, skip non-HTML bodies and read at most
/// `MAX_BODY_BYTES` of the rest.
pub async fn read_page(mut response: Response) -> Result<FetchedPage, CrawlError> {
    let status = response.status();
    if !status.is_success() {
        return Err(CrawlError::Status(status.as_u16()));
    }

    let final_url = response.url().clone();
    let is_html = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("html"))
        .unwrap_or(true);

    if !is_html {
        return Ok(FetchedPage {
            final_url,
            html: String::new(),
        });
    }

    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = MAX_BODY_BYTES - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= MAX_BODY_BYTES {
            tracing::debug!(url = %final_url, "Response body truncated");
            break;
        }
    }

    Ok(FetchedPage {
        final_url,
        html: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// Fetches pages over HTTP with SSRF protection.
///
/// Host names are resolved through `PublicOnlyResolver`, which refuses
/// private addresses at connect time. Literal IPs bypass DNS, so they are
/// checked on the initial URL and on every redirect target.
pub struct HttpFetcher {
    client: ReqwestClient,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, CrawlError> {
        let policy = redirect::Policy::custom(|attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if literal_private_host(attempt.url()) {
                let host = attempt.url().host_str().unwrap_or_default().to_string();
                attempt.error(CrawlError::PrivateAddress(host))
            } else {
                attempt.follow()
            }
        });

        let client = ReqwestClient::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .redirect(policy)
            .dns_resolver(Arc::new(PublicOnlyResolver))
            .build()?;

        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, raw: &str) -> Result<FetchedPage, CrawlError> {
        let url = parse_target(raw)?;
        if literal_private_host(&url) {
            let host = url.host_str().unwrap_or_default().to_string();
            return Err(CrawlError::PrivateAddress(host));
        }

        let response = self.client.get(url).send().await.map_err(classify)?;
        read_page(response).await
    }
}
