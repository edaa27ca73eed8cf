//! Where tool calls and spec downloads may go, and how much they may read back.

use crate::error::HttpToolsError;
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::net::lookup_host;
use url::{Host, Url};

pub const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectPolicy {
    None,
    /// Follow up to [`MAX_REDIRECTS`] hops, re-checking each destination.
    Follow,
}

/// Destination and size policy applied by [`crate::ReqwestExecutor`] before every request.
#[derive(Debug, Clone)]
pub struct OutboundHttpSafety {
    /// Lowercase host names. `*.example.com` admits every subdomain of `example.com`.
    /// `None` admits any host.
    pub allowed_hosts: Option<HashSet<String>>,
    pub allow_private_networks: bool,
    /// Response body cap in bytes; `None` reads everything.
    pub max_response_bytes: Option<usize>,
    pub redirects: RedirectPolicy,
}

impl Default for OutboundHttpSafety {
    fn default() -> Self {
        Self::permissive()
    }
}

impl OutboundHttpSafety {
    /// Any `http(s)` destination, local services included.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            allowed_hosts: None,
            allow_private_networks: true,
            max_response_bytes: None,
            redirects: RedirectPolicy::Follow,
        }
    }

    /// Public destinations only, 1 MiB bodies, no redirects.
    #[must_use]
    pub fn restricted() -> Self {
        Self {
            allowed_hosts: None,
            allow_private_networks: false,
            max_response_bytes: Some(1024 * 1024),
            redirects: RedirectPolicy::None,
        }
    }

    #[must_use]
    pub fn with_allowed_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_hosts = Some(
            hosts
                .into_iter()
                .map(|h| h.as_ref().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    fn host_allowed(&self, host: &str) -> bool {
        let Some(allowed) = &self.allowed_hosts else {
            return true;
        };
        let host = host.to_ascii_lowercase();
        if allowed.contains(&host) {
            return true;
        }
        allowed.iter().any(|entry| {
            entry
                .strip_prefix("*.")
                .is_some_and(|domain| host.ends_with(&format!(".{domain}")))
        })
    }

    /// Reject URLs this policy does not permit. Host names are resolved and every address is
    /// checked when private networks are not allowed.
    ///
    /// # Errors
    ///
    /// [`HttpToolsError::Http`] naming the reason: scheme, missing host, allowlist, or the
    /// blocked address range.
    pub async fn check_url(&self, url: &Url) -> Result<(), HttpToolsError> {
        if let Some(reason) = self.static_block_reason(url) {
            return Err(blocked(reason));
        }
        if self.allow_private_networks || literal_ip(url).is_some() {
            return Ok(());
        }
        let Some(host) = url.host_str() else {
            return Ok(());
        };

        let port = url.port_or_known_default().unwrap_or(443);
        let addrs: Vec<IpAddr> = lookup_host((host, port))
            .await
            .map_err(|e| {
                HttpToolsError::Http(format!("DNS lookup failed for host '{host}': {e}"))
            })?
            .map(|a| a.ip())
            .collect();
        if addrs.is_empty() {
            return Err(HttpToolsError::Http(format!(
                "DNS lookup returned no addresses for host '{host}'"
            )));
        }
        for ip in addrs {
            if let Some(range) = BlockedRange::of(ip) {
                return Err(blocked(format!(
                    "host '{host}' resolved to {ip}, a {range} address"
                )));
            }
        }
        Ok(())
    }

    /// The checks that need no DNS: scheme, allowlist and literal IP hosts. Redirect hops are
    /// held to these.
    fn static_block_reason(&self, url: &Url) -> Option<String> {
        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Some(format!("unsupported URL scheme '{scheme}'"));
        }
        let Some(host) = url.host_str() else {
            return Some("missing URL host".to_string());
        };
        if !self.host_allowed(host) {
            return Some(format!("host '{host}' not in allowlist"));
        }
        if self.allow_private_networks {
            return None;
        }
        let ip = literal_ip(url)?;
        BlockedRange::of(ip).map(|range| format!("{ip} is a {range} address"))
    }

    /// The `reqwest` redirect policy matching [`Self::redirects`].
    #[must_use]
    pub fn redirect_policy(&self) -> reqwest::redirect::Policy {
        match self.redirects {
            RedirectPolicy::None => reqwest::redirect::Policy::none(),
            RedirectPolicy::Follow => {
                let safety = self.clone();
                reqwest::redirect::Policy::custom(move |attempt| {
                    if attempt.previous().len() >= MAX_REDIRECTS {
                        return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
                    }
                    match safety.static_block_reason(attempt.url()) {
                        Some(reason) => {
                            tracing::warn!(
                                url = %redact_url(attempt.url()),
                                "Refusing redirect: {reason}"
                            );
                            attempt.error(format!("Outbound HTTP blocked: redirect {reason}"))
                        }
                        None => attempt.follow(),
                    }
                })
            }
        }
    }
}

fn blocked(reason: String) -> HttpToolsError {
    HttpToolsError::Http(format!("Outbound HTTP blocked: {reason}"))
}

fn literal_ip(url: &Url) -> Option<IpAddr> {
    match url.host()? {
        Host::Ipv4(ip) => Some(IpAddr::V4(ip)),
        Host::Ipv6(ip) => Some(IpAddr::V6(ip)),
        Host::Domain(_) => None,
    }
}

/// Address ranges refused when private networks are not allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockedRange {
    Loopback,
    Private,
    LinkLocal,
    SharedAddressSpace,
    Unspecified,
    Broadcast,
    Multicast,
    Reserved,
    UniqueLocal,
}

impl BlockedRange {
    fn of(ip: IpAddr) -> Option<Self> {
        match ip {
            IpAddr::V4(v4) => Self::of_v4(v4),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => Self::of_v4(v4),
                None => Self::of_v6(v6),
            },
        }
    }

    fn of_v4(ip: Ipv4Addr) -> Option<Self> {
        let [a, b, ..] = ip.octets();
        if ip.is_loopback() {
            Some(Self::Loopback)
        } else if ip.is_private() {
            Some(Self::Private)
        } else if ip.is_link_local() {
            Some(Self::LinkLocal)
        } else if a == 100 && (64..=127).contains(&b) {
            Some(Self::SharedAddressSpace)
        } else if ip.is_unspecified() {
            Some(Self::Unspecified)
        } else if ip.is_broadcast() {
            Some(Self::Broadcast)
        } else if ip.is_multicast() {
            Some(Self::Multicast)
        } else if a >= 240 {
            Some(Self::Reserved)
        } else {
            None
        }
    }

    fn of_v6(ip: Ipv6Addr) -> Option<Self> {
        if ip.is_loopback() {
            Some(Self::Loopback)
        } else if ip.is_unspecified() {
            Some(Self::Unspecified)
        } else if ip.is_multicast() {
            Some(Self::Multicast)
        } else if ip.is_unique_local() {
            Some(Self::UniqueLocal)
        } else if ip.is_unicast_link_local() {
            Some(Self::LinkLocal)
        } else {
            None
        }
    }
}

impl fmt::Display for BlockedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Loopback => "loopback",
            Self::Private => "private",
            Self::LinkLocal => "link-local",
            Self::SharedAddressSpace => "shared (CGNAT)",
            Self::Unspecified => "unspecified",
            Self::Broadcast => "broadcast",
            Self::Multicast => "multicast",
            Self::Reserved => "reserved",
            Self::UniqueLocal => "unique-local",
        })
    }
}

/// `url` with credentials, query and fragment removed, for logs and error messages.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

/// reqwest's error text with any embedded URL redacted.
#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let text = e.to_string();
    match e.url() {
        Some(u) => text.replace(u.as_str(), &redact_url(u)),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).expect("url")
    }

    #[tokio::test]
    async fn restricted_policy_names_the_blocked_range() {
        let safety = OutboundHttpSafety::restricted();
        for (raw, range) in [
            ("http://127.0.0.1:1234/", "loopback"),
            ("http://169.254.169.254/latest/meta-data", "link-local"),
            ("http://[::1]/", "loopback"),
            ("http://[::ffff:10.0.0.1]/", "private"),
            ("http://100.100.1.1/", "CGNAT"),
            ("http://[fd00::1]/", "unique-local"),
        ] {
            let err = safety.check_url(&url(raw)).await.unwrap_err().to_string();
            assert!(err.contains("blocked"), "{raw}: {err}");
            assert!(err.contains(range), "{raw}: {err}");
        }
        safety.check_url(&url("http://93.184.216.34/")).await.expect("public");
    }

    #[tokio::test]
    async fn permissive_policy_allows_local_apis() {
        let safety = OutboundHttpSafety::default();
        safety
            .check_url(&url("http://127.0.0.1:1234/openapi.json"))
            .await
            .expect("allowed");
    }

    #[tokio::test]
    async fn rejects_other_schemes_and_unlisted_hosts() {
        let safety = OutboundHttpSafety::permissive();
        let err = safety.check_url(&url("file:///etc/passwd")).await.unwrap_err();
        assert!(err.to_string().contains("unsupported URL scheme"));

        let safety = safety.with_allowed_hosts(["API.github.com", "*.stripe.com"]);
        let err = safety.check_url(&url("https://evil.example/")).await.unwrap_err();
        assert!(err.to_string().contains("not in allowlist"));
        for ok in [
            "https://api.github.com/repos",
            "https://files.stripe.com/v1",
            "https://a.b.stripe.com/",
        ] {
            safety.check_url(&url(ok)).await.expect(ok);
        }
        assert!(safety.check_url(&url("https://stripe.com/")).await.is_err());
        assert!(safety.check_url(&url("https://notstripe.com/")).await.is_err());
    }

    #[test]
    fn redirect_hops_get_the_static_checks() {
        let safety = OutboundHttpSafety::permissive().with_allowed_hosts(["api.example.com"]);
        assert!(safety.static_block_reason(&url("https://api.example.com/next")).is_none());
        assert!(
            safety
                .static_block_reason(&url("https://evil.example/next"))
                .is_some_and(|r| r.contains("allowlist"))
        );

        let mut safety = OutboundHttpSafety::permissive();
        assert!(safety.static_block_reason(&url("http://10.0.0.1:8080/")).is_none());
        safety.allow_private_networks = false;
        assert!(
            safety
                .static_block_reason(&url("http://10.0.0.1:8080/"))
                .is_some_and(|r| r.contains("private"))
        );
        assert!(
            safety
                .static_block_reason(&url("ftp://api.example.com/"))
                .is_some_and(|r| r.contains("scheme"))
        );
    }

    #[test]
    fn redacts_credentials_and_query() {
        let u = url("https://user:pw@api.example.com/v1/items?api_key=abc#frag");
        assert_eq!(redact_url(&u), "https://api.example.com/v1/items");
    }
}
