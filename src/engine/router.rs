use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::engine::fleet::is_public;
use crate::model::{PolicyRule, Route, RouterKind, RouterMetadata};

/// One router of the fleet: its routing table, policy rules, interface
/// address maps, and metadata. Read-only after load.
///
/// Two interface views are kept. The primary map (interface to one address)
/// is derived from routes carrying a preferred source and drives next-hop
/// identity. The full map (interface to every configured address) comes from
/// the collected interface facts and drives ownership checks.
#[derive(Debug, Clone)]
pub struct Router {
    name: String,
    routes: Vec<Route>,
    rules: Vec<PolicyRule>,
    metadata: RouterMetadata,
    interfaces: BTreeMap<String, IpAddr>,
    all_interfaces: BTreeMap<String, Vec<IpAddr>>,
}

impl Router {
    pub fn new(
        name: impl Into<String>,
        routes: Vec<Route>,
        mut rules: Vec<PolicyRule>,
        metadata: RouterMetadata,
        all_interfaces: BTreeMap<String, Vec<IpAddr>>,
    ) -> Self {
        let mut interfaces = BTreeMap::new();
        for route in &routes {
            if let Some(prefsrc) = route.prefsrc() {
                interfaces.insert(route.dev().to_string(), prefsrc);
            }
        }
        rules.sort_by_key(|rule| rule.priority);
        Self {
            name: name.into(),
            routes,
            rules,
            metadata,
            interfaces,
            all_interfaces,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &RouterMetadata {
        &self.metadata
    }

    pub fn is_linux(&self) -> bool {
        self.metadata.linux
    }

    pub fn kind(&self) -> RouterKind {
        self.metadata.kind
    }

    pub fn is_ansible_controller(&self) -> bool {
        self.metadata.ansible_controller
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn interfaces(&self) -> &BTreeMap<String, IpAddr> {
        &self.interfaces
    }

    pub fn all_interfaces(&self) -> &BTreeMap<String, Vec<IpAddr>> {
        &self.all_interfaces
    }

    pub fn interface_address(&self, name: &str) -> Option<IpAddr> {
        self.interfaces.get(name).copied()
    }

    /// Every address configured on this router, primary and secondary.
    pub fn all_addresses(&self) -> Vec<IpAddr> {
        self.all_interfaces.values().flatten().copied().collect()
    }

    /// True when `addr` is configured on any interface of this router.
    pub fn owns_address(&self, addr: IpAddr) -> bool {
        self.all_interfaces
            .values()
            .any(|addrs| addrs.contains(&addr))
    }

    /// The interface carrying `addr`, searching primary and secondary
    /// addresses.
    pub fn owning_interface(&self, addr: IpAddr) -> Option<&str> {
        self.all_interfaces
            .iter()
            .find(|(_, addrs)| addrs.contains(&addr))
            .map(|(name, _)| name.as_str())
    }

    /// The interface whose primary address equals `addr`.
    pub fn primary_interface_for(&self, addr: IpAddr) -> Option<&str> {
        self.interfaces
            .iter()
            .find(|(_, ip)| **ip == addr)
            .map(|(name, _)| name.as_str())
    }

    /// Longest-prefix-match lookup over this router's table.
    ///
    /// Blackhole/unreachable/prohibit entries are skipped before matching.
    /// Ties on prefix length are broken by lower metric, then by insertion
    /// order. The default route participates with length 0.
    pub fn best_route(&self, dst: IpAddr) -> Option<&Route> {
        let mut best: Option<(&Route, u8)> = None;
        for route in &self.routes {
            if route.is_discarded() {
                continue;
            }
            let Some(prefix_len) = route.matches(dst) else {
                continue;
            };
            let better = match best {
                None => true,
                Some((current, current_len)) => {
                    prefix_len > current_len
                        || (prefix_len == current_len && route.metric() < current.metric())
                }
            };
            if better {
                best = Some((route, prefix_len));
            }
        }
        best.map(|(route, _)| route)
    }

    /// The interface of the connected network covering `addr`, if any. Also
    /// answers the peer-side incoming-interface question: which interface on
    /// this router receives traffic sent from `addr`.
    pub fn connected_interface_for(&self, addr: IpAddr) -> Option<&str> {
        self.routes
            .iter()
            .find(|route| route.is_connected_net() && route.matches(addr).is_some())
            .map(Route::dev)
    }

    /// Whether `addr` is directly reachable from this router, and whether
    /// this router owns it. Gateways additionally reach any public address.
    pub fn is_destination_reachable(&self, addr: IpAddr) -> (bool, bool) {
        if self.owns_address(addr) {
            return (true, true);
        }
        if self.connected_interface_for(addr).is_some() {
            return (true, false);
        }
        if self.metadata.is_gateway() && is_public(addr) {
            return (true, false);
        }
        (false, false)
    }

    /// The interface a gateway uses toward the internet: the first interface
    /// with a public primary address, falling back to `eth0` when present.
    pub fn public_interface(&self) -> Option<&str> {
        self.interfaces
            .iter()
            .find(|(_, addr)| is_public(**addr))
            .map(|(name, _)| name.as_str())
            .or_else(|| {
                self.interfaces
                    .contains_key("eth0")
                    .then_some("eth0")
            })
    }
}
