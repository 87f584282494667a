//! Allow-list of single addresses / subnets, consulted on every request (§4.A).

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

use crate::error::AclError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AllowEntry {
    Host(IpAddr),
    Net(IpNet),
}

impl AllowEntry {
    fn contains(&self, peer: IpAddr) -> bool {
        match self {
            AllowEntry::Host(host) => *host == peer,
            AllowEntry::Net(net) => net.contains(&peer),
        }
    }

    fn parse(raw: &str) -> Result<Self, AclError> {
        if let Some((addr, prefix)) = raw.rsplit_once('/') {
            if prefix.chars().all(|c| c.is_ascii_digit()) {
                let net: IpNet = format!("{addr}/{prefix}")
                    .parse()
                    .map_err(|_| invalid(raw))?;
                return Ok(AllowEntry::Net(net));
            }
        }
        let host = IpAddr::from_str(raw).map_err(|_| invalid(raw))?;
        Ok(AllowEntry::Host(host))
    }
}

fn invalid(raw: &str) -> AclError {
    AclError::InvalidEntry {
        entry: raw.to_string(),
    }
}

/// The allow-list consulted by the reactor on every request.
///
/// Invariant: after successful construction the list always contains at
/// least the v4 loopback `/8` and the v6 loopback `::1`.
#[derive(Debug, Clone)]
pub struct Acl {
    entries: Vec<AllowEntry>,
}

impl Acl {
    /// Parse a configured list of address/subnet strings. Loopback v4/v6 are
    /// always prepended. Any unparsable entry fails the whole construction
    /// (§4.A: "no side effects beyond logging").
    pub fn new(configured: &[String]) -> Result<Self, AclError> {
        let mut entries = vec![
            AllowEntry::Net("127.0.0.0/8".parse().expect("static CIDR")),
            AllowEntry::Host("::1".parse().expect("static address")),
        ];
        for raw in configured {
            match AllowEntry::parse(raw) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    log::error!(target: "httpserver::acl", "failed to parse -rpcallowip entry '{raw}': {err}");
                    return Err(err);
                }
            }
        }
        Ok(Acl { entries })
    }

    /// An allow-list with only the two mandatory loopback entries — the
    /// default when no `-rpcallowip` was configured.
    pub fn loopback_only() -> Self {
        Acl::new(&[]).expect("loopback-only ACL never fails to parse")
    }

    /// Returns true iff some entry contains the peer address. Linear scan,
    /// no shared mutable state — safe to call concurrently without locking.
    pub fn allows(&self, peer: IpAddr) -> bool {
        self.entries.iter().any(|e| e.contains(peer))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        false // always carries the two loopback entries
    }
}
