//! DNS-rebinding defence.
//!
//! A rebinding attack points an attacker-controlled hostname at
//! 127.0.0.1 so a victim's browser can reach a local server with a
//! same-origin request. The defence pins the `Host` header to an allowed
//! set and rejects unexpected `Origin`s. Non-browser clients that send no
//! `Origin` at all are permitted.

use tracing::warn;

/// Outcome of a failed check; maps directly onto the HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebindingViolation {
    /// `Host` missing or not in the allowed set → 421
    Host,
    /// `Origin` present but not allowed → 403
    Origin,
}

/// Host/Origin allow-list policy
#[derive(Debug, Clone)]
pub enum DnsRebindingProtection {
    /// No checks; for servers behind a trusted reverse proxy
    None,
    /// Allow localhost forms only, optionally pinned to a port
    Localhost { port: Option<u16> },
    /// Explicit allow-lists. Host entries compare case-insensitively;
    /// origin entries match the full serialized origin.
    Custom {
        allowed_hosts: Vec<String>,
        allowed_origins: Vec<String>,
    },
}

impl DnsRebindingProtection {
    /// Pick a sensible policy from the socket address the server binds:
    /// loopback binds get localhost pinning, anything else (wildcard or
    /// public) disables the check — the operator is exposing the server
    /// on purpose.
    pub fn for_bind_address(host: &str, port: u16) -> Self {
        match host {
            "127.0.0.1" | "::1" | "localhost" => DnsRebindingProtection::Localhost {
                port: Some(port),
            },
            _ => DnsRebindingProtection::None,
        }
    }

    fn host_allowed(&self, host: &str) -> bool {
        match self {
            DnsRebindingProtection::None => true,
            DnsRebindingProtection::Localhost { port } => {
                let (name, given_port) = split_host_port(host);
                let name_ok = matches!(name, "localhost" | "127.0.0.1" | "[::1]" | "::1");
                let port_ok = match (port, given_port) {
                    (Some(expected), Some(given)) => *expected == given,
                    (Some(_), None) => false,
                    (None, _) => true,
                };
                name_ok && port_ok
            }
            DnsRebindingProtection::Custom { allowed_hosts, .. } => allowed_hosts
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(host)),
        }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        match self {
            DnsRebindingProtection::None => true,
            DnsRebindingProtection::Localhost { .. } => {
                origin.starts_with("http://localhost")
                    || origin.starts_with("http://127.0.0.1")
                    || origin.starts_with("https://localhost")
                    || origin.starts_with("https://127.0.0.1")
            }
            DnsRebindingProtection::Custom {
                allowed_origins, ..
            } => allowed_origins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(origin)),
        }
    }

    /// Validate one request's headers
    pub fn check(
        &self,
        host: Option<&str>,
        origin: Option<&str>,
    ) -> Result<(), RebindingViolation> {
        if matches!(self, DnsRebindingProtection::None) {
            return Ok(());
        }

        match host {
            None => {
                warn!("rejecting request without Host header");
                return Err(RebindingViolation::Host);
            }
            Some(host) if !self.host_allowed(host) => {
                warn!(host = %host, "rejecting request with disallowed Host");
                return Err(RebindingViolation::Host);
            }
            Some(_) => {}
        }

        // Missing Origin is fine: non-browser clients don't send one.
        if let Some(origin) = origin {
            if !self.origin_allowed(origin) {
                warn!(origin = %origin, "rejecting request with disallowed Origin");
                return Err(RebindingViolation::Origin);
            }
        }

        Ok(())
    }
}

fn split_host_port(host: &str) -> (&str, Option<u16>) {
    // bracketed IPv6 form first
    if let Some(end) = host.strip_prefix('[').and_then(|_| host.find(']')) {
        let name = &host[..=end];
        let port = host[end + 1..]
            .strip_prefix(':')
            .and_then(|p| p.parse().ok());
        return (name, port);
    }
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse() {
            Ok(port) => (name, Some(port)),
            Err(_) => (host, None),
        },
        None => (host, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_allows_anything() {
        let protection = DnsRebindingProtection::None;
        assert!(protection.check(None, None).is_ok());
        assert!(protection.check(Some("evil.example"), Some("http://evil.example")).is_ok());
    }

    #[test]
    fn test_localhost_pins_host_and_port() {
        let protection = DnsRebindingProtection::Localhost { port: Some(8080) };
        assert!(protection.check(Some("localhost:8080"), None).is_ok());
        assert!(protection.check(Some("127.0.0.1:8080"), None).is_ok());
        assert_eq!(
            protection.check(Some("localhost:9999"), None),
            Err(RebindingViolation::Host)
        );
        assert_eq!(
            protection.check(Some("evil.example:8080"), None),
            Err(RebindingViolation::Host)
        );
        assert_eq!(protection.check(None, None), Err(RebindingViolation::Host));
    }

    #[test]
    fn test_origin_checked_only_when_present() {
        let protection = DnsRebindingProtection::Localhost { port: Some(8080) };
        assert!(protection
            .check(Some("localhost:8080"), Some("http://localhost:3000"))
            .is_ok());
        assert_eq!(
            protection.check(Some("localhost:8080"), Some("https://evil.example")),
            Err(RebindingViolation::Origin)
        );
        // non-browser client: no Origin at all
        assert!(protection.check(Some("localhost:8080"), None).is_ok());
    }

    #[test]
    fn test_custom_lists() {
        let protection = DnsRebindingProtection::Custom {
            allowed_hosts: vec!["mcp.internal:443".into()],
            allowed_origins: vec!["https://app.internal".into()],
        };
        assert!(protection
            .check(Some("MCP.Internal:443"), Some("https://app.internal"))
            .is_ok());
        assert_eq!(
            protection.check(Some("other:443"), None),
            Err(RebindingViolation::Host)
        );
    }

    #[test]
    fn test_for_bind_address() {
        assert!(matches!(
            DnsRebindingProtection::for_bind_address("127.0.0.1", 8080),
            DnsRebindingProtection::Localhost { port: Some(8080) }
        ));
        assert!(matches!(
            DnsRebindingProtection::for_bind_address("0.0.0.0", 8080),
            DnsRebindingProtection::None
        ));
        assert!(matches!(
            DnsRebindingProtection::for_bind_address("10.1.2.3", 8080),
            DnsRebindingProtection::None
        ));
    }

    #[test]
    fn test_ipv6_host_parsing() {
        let protection = DnsRebindingProtection::Localhost { port: Some(8080) };
        assert!(protection.check(Some("[::1]:8080"), None).is_ok());
    }
}
