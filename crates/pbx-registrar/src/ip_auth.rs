//! IP-auth matcher (C2): maps a trunk's ACL of CIDR prefixes to source IP
//! lookups. Linear scan — cardinality is expected to stay under 100, so a
//! prefix trie buys nothing here (§9).

use std::net::IpAddr;

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy)]
struct Cidr {
    network: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    fn parse(entry: &str) -> Option<Self> {
        if let Some((addr, len)) = entry.split_once('/') {
            let network: IpAddr = addr.parse().ok()?;
            let prefix_len: u8 = len.parse().ok()?;
            Some(Self { network, prefix_len })
        } else {
            let network: IpAddr = entry.parse().ok()?;
            let prefix_len = match network {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            Some(Self { network, prefix_len })
        }
    }

    fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(a)) => {
                let mask = if self.prefix_len == 0 { 0 } else { u32::MAX << (32 - self.prefix_len) };
                (u32::from(net) & mask) == (u32::from(a) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(a)) => {
                let mask = if self.prefix_len == 0 { 0 } else { u128::MAX << (128 - self.prefix_len) };
                (u128::from(net) & mask) == (u128::from(a) & mask)
            }
            _ => false,
        }
    }
}

struct Entry {
    trunk_id: u64,
    name: String,
    priority: i32,
    prefixes: Vec<Cidr>,
}

pub struct IpAuthMatcher {
    entries: RwLock<Vec<Entry>>,
}

impl IpAuthMatcher {
    pub fn new() -> Self {
        Self { entries: RwLock::new(Vec::new()) }
    }

    /// Replaces any existing entry with the same trunk id. `remote_hosts`
    /// is the trunk's JSON array of IPs or CIDRs.
    pub fn add_trunk(&self, trunk_id: u64, name: &str, priority: i32, remote_hosts: &[String]) {
        let prefixes: Vec<Cidr> = remote_hosts.iter().filter_map(|h| Cidr::parse(h)).collect();
        let mut entries = self.entries.write();
        entries.retain(|e| e.trunk_id != trunk_id);
        entries.push(Entry { trunk_id, name: name.to_string(), priority, prefixes });
    }

    pub fn remove_trunk(&self, trunk_id: u64) {
        self.entries.write().retain(|e| e.trunk_id != trunk_id);
    }

    /// Accepts "ip" or "ip:port"; returns the matching trunk id and name,
    /// lowest-priority-number wins among multiple matches.
    pub fn match_ip(&self, addr: &str) -> (u64, Option<String>) {
        let ip_part = addr.rsplit_once(':').map(|(ip, _)| ip).unwrap_or(addr);
        let Ok(ip) = ip_part.parse::<IpAddr>() else { return (0, None) };

        let entries = self.entries.read();
        entries
            .iter()
            .filter(|e| e.prefixes.iter().any(|p| p.contains(ip)))
            .min_by_key(|e| e.priority)
            .map(|e| (e.trunk_id, Some(e.name.clone())))
            .unwrap_or((0, None))
    }
}

impl Default for IpAuthMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_ipv4_becomes_slash_32() {
        let matcher = IpAuthMatcher::new();
        matcher.add_trunk(1, "carrier-a", 10, &["203.0.113.5".to_string()]);
        assert_eq!(matcher.match_ip("203.0.113.5").0, 1);
        assert_eq!(matcher.match_ip("203.0.113.6").0, 0);
    }

    #[test]
    fn lowest_priority_number_wins_on_overlap() {
        let matcher = IpAuthMatcher::new();
        matcher.add_trunk(1, "low-prio", 20, &["203.0.113.0/24".to_string()]);
        matcher.add_trunk(2, "high-prio", 5, &["203.0.113.0/24".to_string()]);
        assert_eq!(matcher.match_ip("203.0.113.9:5060").0, 2);
    }

    #[test]
    fn add_trunk_replaces_existing_entry() {
        let matcher = IpAuthMatcher::new();
        matcher.add_trunk(1, "carrier-a", 10, &["203.0.113.5".to_string()]);
        matcher.add_trunk(1, "carrier-a", 10, &["198.51.100.5".to_string()]);
        assert_eq!(matcher.match_ip("203.0.113.5").0, 0);
        assert_eq!(matcher.match_ip("198.51.100.5").0, 1);
    }
}
