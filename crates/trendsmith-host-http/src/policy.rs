use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;

use url::Url;

use crate::error::HttpError;

/// User-Agent sent when the caller does not override it.
pub const DEFAULT_USER_AGENT: &str = concat!("trendsmith/", env!("CARGO_PKG_VERSION"));

/// Rules every outgoing request is checked against.
#[derive(Debug, Clone)]
pub struct HttpPolicy {
  /// Hosts that may be contacted. Empty means any public host.
  pub allowed_hosts: BTreeSet<String>,
  /// Permit loopback and private addresses (mock servers in tests).
  pub allow_private: bool,
  /// Bodies are cut off after this many bytes.
  pub max_response_bytes: usize,
  pub timeout: Duration,
  pub max_redirects: usize,
  pub user_agent: String,
}

impl Default for HttpPolicy {
  fn default() -> Self {
    Self {
      allowed_hosts: BTreeSet::new(),
      allow_private: false,
      max_response_bytes: 2 * 1024 * 1024,
      timeout: Duration::from_secs(10),
      max_redirects: 5,
      user_agent: DEFAULT_USER_AGENT.to_string(),
    }
  }
}

impl HttpPolicy {
  /// A policy that only reaches `host`.
  pub fn single_host(host: impl Into<String>) -> Self {
    Self {
      allowed_hosts: BTreeSet::from([host.into()]),
      ..Self::default()
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
    self.max_response_bytes = limit;
    self
  }

  pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
    self.user_agent = user_agent.into();
    self
  }

  pub fn allow_private(mut self) -> Self {
    self.allow_private = true;
    self
  }

  /// Parse `raw` and check it against the policy.
  pub fn check_str(&self, raw: &str) -> Result<Url, HttpError> {
    let url = Url::parse(raw).map_err(|e| HttpError::invalid_url(raw, e.to_string()))?;
    self.check(&url)?;
    Ok(url)
  }

  /// Check a parsed URL against the policy.
  pub fn check(&self, url: &Url) -> Result<(), HttpError> {
    match url.scheme() {
      "http" | "https" => {}
      other => {
        return Err(HttpError::invalid_url(
          url.as_str(),
          format!("unsupported scheme '{}'", other),
        ));
      }
    }

    let host = url
      .host_str()
      .ok_or_else(|| HttpError::invalid_url(url.as_str(), "missing host"))?;

    if !self.allowed_hosts.is_empty() && !self.allowed_hosts.contains(host) {
      return Err(HttpError::blocked(
        url.as_str(),
        format!("host '{}' is not allowed", host),
      ));
    }

    if !self.allow_private && is_ssrf_target(url) {
      return Err(HttpError::blocked(url.as_str(), "private or local address"));
    }

    Ok(())
  }
}

/// Check if a URL targets a loopback, private or otherwise local resource.
pub fn is_ssrf_target(url: &Url) -> bool {
  match url.scheme() {
    "http" | "https" => {}
    _ => return true,
  }

  match url.host() {
    Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
    Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
    Some(url::Host::Domain(host)) => {
      host == "localhost"
        || host.ends_with(".localhost")
        || host.ends_with(".local")
        || host.ends_with(".internal")
    }
    None => true,
  }
}

/// Check if an IP is in a private or reserved range.
pub fn is_private_ip(ip: &IpAddr) -> bool {
  match ip {
    IpAddr::V4(v4) => {
      let [a, b, c, _] = v4.octets();
      v4.is_loopback()
        || v4.is_private()
        || v4.is_link_local()
        || v4.is_broadcast()
        || v4.is_unspecified()
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xC0) == 64)
        || (a == 192 && b == 0 && c == 0)
    }
    IpAddr::V6(v6) => {
      let first = v6.segments()[0];
      v6.is_loopback()
        || v6.is_unspecified()
        // fc00::/7 unique local, fe80::/10 link local
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
        || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(&IpAddr::V4(v4)))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn blocks_local_targets() {
    for raw in [
      "http://localhost/",
      "http://127.0.0.1:8080/",
      "http://10.0.0.1/",
      "http://192.168.1.1/",
      "http://169.254.169.254/latest/meta-data",
      "http://[::1]/",
      "http://[fd00::1]/",
      "http://printer.local/",
      "http://metadata.google.internal/",
    ] {
      let url = Url::parse(raw).unwrap();
      assert!(is_ssrf_target(&url), "{} should be blocked", raw);
    }
  }

  #[test]
  fn allows_public_targets() {
    for raw in ["https://example.com/x", "http://93.184.216.34/"] {
      let url = Url::parse(raw).unwrap();
      assert!(!is_ssrf_target(&url), "{} should pass", raw);
    }
  }

  #[test]
  fn check_rejects_other_schemes() {
    let policy = HttpPolicy::default();
    assert!(matches!(
      policy.check_str("file:///etc/passwd"),
      Err(HttpError::InvalidUrl { .. })
    ));
  }

  #[test]
  fn host_allow_list_is_exact() {
    let policy = HttpPolicy::single_host("example.com");
    assert!(policy.check_str("https://example.com/a").is_ok());
    assert!(matches!(
      policy.check_str("https://evil.example.com/a"),
      Err(HttpError::Blocked { .. })
    ));
    assert!(matches!(
      policy.check_str("https://other.org/"),
      Err(HttpError::Blocked { .. })
    ));
  }

  #[test]
  fn allow_private_lifts_ssrf_guard_only() {
    let policy = HttpPolicy::single_host("127.0.0.1").allow_private();
    assert!(policy.check_str("http://127.0.0.1:9000/").is_ok());
    assert!(policy.check_str("http://10.0.0.1/").is_err());
  }
}
