//! Peer address whitelist
//!
//! The filter compares the textual form of the peer IP, as reported by the
//! TCP layer, against a fixed set of configured strings. There is no CIDR
//! matching and no DNS resolution.
//!
//! # Security
//! This is a coarse perimeter, not an authentication mechanism. It is only
//! as trustworthy as the transport's notion of peer identity: anything able
//! to originate TCP from a whitelisted address (a shared NAT, a compromised
//! host on the same network, a proxy in front of the listener) is admitted.
//! Textual matching also means `::ffff:127.0.0.1` and `127.0.0.1` are
//! distinct entries.

use std::collections::HashSet;
use std::net::IpAddr;

#[derive(Debug, Clone, Default)]
pub struct AccessFilter {
    whitelist: HashSet<String>,
}

impl AccessFilter {
    pub fn new<I, S>(whitelist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            whitelist: whitelist
                .into_iter()
                .map(|ip| ip.into().trim().to_string())
                .collect(),
        }
    }

    /// Whether `peer` may submit mail. The port is never consulted.
    pub fn is_allowed(&self, peer: IpAddr) -> bool {
        self.whitelist.contains(&peer.to_string())
    }

    pub fn len(&self) -> usize {
        self.whitelist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.whitelist.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_allowed() {
        let filter = AccessFilter::new(["127.0.0.1", "10.1.2.3"]);
        assert!(filter.is_allowed("127.0.0.1".parse().unwrap()));
        assert!(filter.is_allowed("10.1.2.3".parse().unwrap()));
    }

    #[test]
    fn test_unknown_peer_rejected() {
        let filter = AccessFilter::new(["127.0.0.1"]);
        assert!(!filter.is_allowed("127.0.0.2".parse().unwrap()));
        assert!(!filter.is_allowed("192.168.1.10".parse().unwrap()));
    }

    #[test]
    fn test_no_prefix_or_cidr_matching() {
        let filter = AccessFilter::new(["10.0.0.0/8", "10.0.0"]);
        assert!(!filter.is_allowed("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_ipv6_textual_form() {
        let filter = AccessFilter::new(["::1"]);
        assert!(filter.is_allowed("::1".parse().unwrap()));
        // Mapped IPv4 is a different string
        assert!(!filter.is_allowed("::ffff:127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_empty_whitelist_rejects_everyone() {
        let filter = AccessFilter::new(Vec::<String>::new());
        assert!(filter.is_empty());
        assert!(!filter.is_allowed("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_entries_are_trimmed() {
        let filter = AccessFilter::new([" 127.0.0.1 "]);
        assert_eq!(filter.len(), 1);
        assert!(filter.is_allowed("127.0.0.1".parse().unwrap()));
    }
}
