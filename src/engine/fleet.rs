use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ipnet::Ipv4Net;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::router::Router;
use crate::model::{PolicyRule, Route, RouterMetadata};
use crate::runtime::transport::local_reverse_lookup;

/// Reverse-lookup budget for the UI-facing name resolution path.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Address ranges that are never treated as public internet destinations.
const NON_PUBLIC_V4: [&str; 8] = [
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "0.0.0.0/8",
];

/// Whether `addr` is a public internet address. IPv6 is never public for
/// this classification.
pub fn is_public(addr: IpAddr) -> bool {
    let IpAddr::V4(v4) = addr else {
        return false;
    };
    !NON_PUBLIC_V4
        .iter()
        .filter_map(|range| range.parse::<Ipv4Net>().ok())
        .any(|net| net.contains(&v4))
}

#[derive(Debug, Deserialize, Default)]
struct RawRouting {
    tables: Option<Value>,
    rules: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct RawNetwork {
    interfaces: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawFacts {
    #[serde(default)]
    routing: RawRouting,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    network: RawNetwork,
}

/// All loaded routers plus the fleet-wide address indices. Immutable after
/// load; may be shared freely across requests.
#[derive(Debug, Clone)]
pub struct Fleet {
    routers: BTreeMap<String, Router>,
    primary_index: BTreeMap<IpAddr, String>,
    any_index: BTreeMap<IpAddr, String>,
}

impl Fleet {
    /// Load one router per `*.json` file in `dir` (router name = file stem).
    /// Sections that fail to parse are logged and treated as empty so a
    /// partially collected router stays usable; a directory yielding zero
    /// routers is an error.
    pub fn load(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir)
            .with_context(|| format!("cannot read facts directory {}", dir.display()))?;

        let mut files: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        let mut routers = Vec::new();
        for path in files {
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match load_router(&path, name) {
                Ok(router) => {
                    debug!(
                        router = name,
                        linux = router.is_linux(),
                        routes = router.routes().len(),
                        "loaded router facts"
                    );
                    routers.push(router);
                }
                Err(err) => warn!("skipping router {name}: {err:#}"),
            }
        }

        if routers.is_empty() {
            bail!("no router data found in {}", dir.display());
        }
        Self::from_routers(routers)
    }

    /// Build a fleet from in-memory routers, constructing both address
    /// indices. A single address claimed by two routers fails the build.
    pub fn from_routers(routers: Vec<Router>) -> Result<Self> {
        let mut primary_index: BTreeMap<IpAddr, String> = BTreeMap::new();
        let mut any_index: BTreeMap<IpAddr, String> = BTreeMap::new();

        for router in &routers {
            for addr in router.interfaces().values() {
                insert_claim(&mut primary_index, *addr, router.name())?;
            }
            for addr in router.all_addresses() {
                insert_claim(&mut any_index, addr, router.name())?;
            }
        }

        Ok(Self {
            routers: routers
                .into_iter()
                .map(|router| (router.name().to_string(), router))
                .collect(),
            primary_index,
            any_index,
        })
    }

    pub fn len(&self) -> usize {
        self.routers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Router> {
        self.routers.get(name)
    }

    pub fn routers(&self) -> impl Iterator<Item = &Router> {
        self.routers.values()
    }

    /// The router owning `addr`, searching primary and secondary addresses.
    pub fn router_by_ip(&self, addr: IpAddr) -> Option<&str> {
        self.any_index.get(&addr).map(String::as_str)
    }

    /// The router whose primary interface address is `addr`.
    pub fn primary_owner(&self, addr: IpAddr) -> Option<&str> {
        self.primary_index.get(&addr).map(String::as_str)
    }

    /// The router object owning `addr`, if any.
    pub fn owner_router(&self, addr: IpAddr) -> Option<&Router> {
        self.router_by_ip(addr).and_then(|name| self.routers.get(name))
    }

    pub fn any_index(&self) -> &BTreeMap<IpAddr, String> {
        &self.any_index
    }

    /// Whether `addr` is a Linux router's address.
    pub fn is_linux_router_ip(&self, addr: IpAddr) -> bool {
        self.router_by_ip(addr)
            .and_then(|name| self.routers.get(name))
            .is_some_and(Router::is_linux)
    }

    /// Resolve an address to a display name: the owning router, else a
    /// reverse lookup through the host name service, else the address
    /// itself.
    pub fn resolve(&self, addr: IpAddr) -> String {
        if let Some(name) = self.router_by_ip(addr) {
            return name.to_string();
        }
        local_reverse_lookup(addr, RESOLVE_TIMEOUT).unwrap_or_else(|| addr.to_string())
    }

    /// Whether some router owns `addr` or has it on a connected network.
    pub fn is_reachable_by_any(&self, addr: IpAddr) -> bool {
        self.routers
            .values()
            .any(|router| router.is_destination_reachable(addr).0)
    }

    /// The first router (in name order) that can directly reach `addr`.
    pub fn find_reaching_router(&self, addr: IpAddr) -> Option<&Router> {
        self.routers
            .values()
            .find(|router| router.is_destination_reachable(addr).0)
    }

    /// Controller address from router metadata: the first router flagged as
    /// the ansible controller, preferring `eth0`, then `eth1`, then any
    /// interface.
    pub fn controller_address(&self) -> Option<IpAddr> {
        let controller = self
            .routers
            .values()
            .find(|router| router.is_ansible_controller())?;
        for preferred in ["eth0", "eth1"] {
            if let Some(addr) = controller.interface_address(preferred) {
                return Some(addr);
            }
        }
        controller.interfaces().values().next().copied()
    }
}

fn insert_claim(
    index: &mut BTreeMap<IpAddr, String>,
    addr: IpAddr,
    router: &str,
) -> Result<()> {
    if let Some(existing) = index.get(&addr) {
        if existing != router {
            bail!("address {addr} claimed by both {existing} and {router}");
        }
        return Ok(());
    }
    index.insert(addr, router.to_string());
    Ok(())
}

fn load_router(path: &Path, name: &str) -> Result<Router> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read facts file {}", path.display()))?;
    let raw: RawFacts = serde_json::from_str(&text)
        .with_context(|| format!("cannot parse facts file {}", path.display()))?;

    let routes = parse_routes(name, raw.routing.tables.as_ref());
    let rules = parse_rules(name, raw.routing.rules.as_ref());
    let metadata = parse_metadata(name, raw.metadata.as_ref());
    let interfaces = parse_interfaces(raw.network.interfaces.as_ref());

    Ok(Router::new(name, routes, rules, metadata, interfaces))
}

fn section_entries<'v>(router: &str, section: &str, value: Option<&'v Value>) -> Vec<&'v Value> {
    match value {
        None => Vec::new(),
        Some(Value::Array(entries)) => entries.iter().collect(),
        Some(Value::Object(map)) if map.contains_key("parsing_error") => {
            let detail = map
                .get("parsing_error")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            warn!("{section} parsing error for {router}: {detail}");
            Vec::new()
        }
        Some(other) => {
            warn!("unexpected {section} shape for {router}: {other}");
            Vec::new()
        }
    }
}

fn parse_routes(router: &str, value: Option<&Value>) -> Vec<Route> {
    section_entries(router, "routing table", value)
        .into_iter()
        .filter_map(|entry| match Route::from_value(entry) {
            Ok(route) => Some(route),
            Err(err) => {
                warn!("skipping route on {router}: {err:#}");
                None
            }
        })
        .collect()
}

fn parse_rules(router: &str, value: Option<&Value>) -> Vec<PolicyRule> {
    section_entries(router, "policy rules", value)
        .into_iter()
        .filter_map(|entry| match PolicyRule::from_value(entry) {
            Ok(rule) => Some(rule),
            Err(err) => {
                warn!("skipping rule on {router}: {err:#}");
                None
            }
        })
        .collect()
}

fn parse_metadata(router: &str, value: Option<&Value>) -> RouterMetadata {
    let Some(value) = value else {
        return RouterMetadata::default();
    };
    match serde_json::from_value(value.clone()) {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!("ignoring malformed metadata for {router}: {err}");
            RouterMetadata::default()
        }
    }
}

/// Interface facts arrive in two shapes: a `parsed` mapping keyed by
/// interface name with `addresses` entries, or a flat sequence of
/// `{dev, prefsrc}` records. IPv4 (`inet`) entries contribute to the full
/// map; addresses stay unique per interface in arrival order.
fn parse_interfaces(value: Option<&Value>) -> BTreeMap<String, Vec<IpAddr>> {
    let mut map: BTreeMap<String, Vec<IpAddr>> = BTreeMap::new();
    match value {
        Some(Value::Object(interfaces)) => {
            let Some(Value::Object(parsed)) = interfaces.get("parsed") else {
                return map;
            };
            for (name, info) in parsed {
                let Some(Value::Array(addresses)) = info.get("addresses") else {
                    continue;
                };
                for entry in addresses {
                    if entry.get("family").and_then(Value::as_str) != Some("inet") {
                        continue;
                    }
                    let Some(addr) = entry
                        .get("address")
                        .and_then(Value::as_str)
                        .and_then(|text| text.parse::<IpAddr>().ok())
                    else {
                        continue;
                    };
                    push_unique(&mut map, name, addr);
                }
            }
        }
        Some(Value::Array(entries)) => {
            for entry in entries {
                let (Some(dev), Some(addr)) = (
                    entry.get("dev").and_then(Value::as_str),
                    entry
                        .get("prefsrc")
                        .and_then(Value::as_str)
                        .and_then(|text| text.parse::<IpAddr>().ok()),
                ) else {
                    continue;
                };
                push_unique(&mut map, dev, addr);
            }
        }
        _ => {}
    }
    map
}

fn push_unique(map: &mut BTreeMap<String, Vec<IpAddr>>, name: &str, addr: IpAddr) {
    let addrs = map.entry(name.to_string()).or_default();
    if !addrs.contains(&addr) {
        addrs.push(addr);
    }
}
