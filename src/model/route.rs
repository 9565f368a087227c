use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use ipnet::IpNet;
use serde::Deserialize;
use serde_json::Value;

/// Routing protocol that installed a route, as reported by `ip --json route`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteProtocol {
    Kernel,
    Boot,
    Static,
    Bgp,
    Ospf,
    Rip,
    Dhcp,
}

impl FromStr for RouteProtocol {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self> {
        Ok(match text {
            "kernel" => Self::Kernel,
            "boot" => Self::Boot,
            "static" => Self::Static,
            "bgp" => Self::Bgp,
            "ospf" => Self::Ospf,
            "rip" => Self::Rip,
            "dhcp" => Self::Dhcp,
            other => bail!("unknown route protocol: {other}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteScope {
    Global,
    Link,
    Host,
    Site,
}

impl FromStr for RouteScope {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self> {
        Ok(match text {
            "global" => Self::Global,
            "link" => Self::Link,
            "host" => Self::Host,
            "site" => Self::Site,
            other => bail!("unknown route scope: {other}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Unicast,
    Local,
    Broadcast,
    Multicast,
    Blackhole,
    Unreachable,
    Prohibit,
}

impl FromStr for RouteKind {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self> {
        Ok(match text {
            "unicast" => Self::Unicast,
            "local" => Self::Local,
            "broadcast" => Self::Broadcast,
            "multicast" => Self::Multicast,
            "blackhole" => Self::Blackhole,
            "unreachable" => Self::Unreachable,
            "prohibit" => Self::Prohibit,
            other => bail!("unknown route type: {other}"),
        })
    }
}

/// Destination of a routing table entry: the default route, a network
/// prefix, or a single host address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDest {
    Default,
    Net(IpNet),
    Host(IpAddr),
}

impl RouteDest {
    pub fn parse(text: &str) -> Result<Self> {
        if text == "default" || text == "0.0.0.0/0" || text == "::/0" {
            return Ok(Self::Default);
        }
        if text.contains('/') {
            let net: IpNet = text
                .parse()
                .with_context(|| format!("invalid destination: {text}"))?;
            return Ok(Self::Net(net));
        }
        let addr: IpAddr = text
            .parse()
            .with_context(|| format!("invalid destination: {text}"))?;
        Ok(Self::Host(addr))
    }
}

impl fmt::Display for RouteDest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Net(net) => write!(f, "{net}"),
            Self::Host(addr) => write!(f, "{addr}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRoute {
    dst: Option<String>,
    dev: String,
    gateway: Option<String>,
    metric: Option<u32>,
    prefsrc: Option<String>,
    protocol: Option<String>,
    scope: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    table: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
}

/// A single routing table entry. Immutable after construction; construction
/// rejects malformed destinations, gateways, and preferred sources.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    dest: RouteDest,
    dev: String,
    gateway: Option<IpAddr>,
    prefsrc: Option<IpAddr>,
    metric: u32,
    protocol: RouteProtocol,
    scope: RouteScope,
    kind: RouteKind,
    table: String,
    flags: Vec<String>,
}

impl Route {
    /// Build a route from one record of a facts file's `routing.tables`
    /// section.
    pub fn from_value(value: &Value) -> Result<Self> {
        let raw: RawRoute =
            serde_json::from_value(value.clone()).context("malformed route record")?;

        let dest = match raw.dst.as_deref() {
            None => RouteDest::Default,
            Some(text) => RouteDest::parse(text)?,
        };
        let gateway = raw
            .gateway
            .as_deref()
            .map(|text| {
                text.parse::<IpAddr>()
                    .with_context(|| format!("invalid gateway: {text}"))
            })
            .transpose()?;
        let prefsrc = raw
            .prefsrc
            .as_deref()
            .map(|text| {
                text.parse::<IpAddr>()
                    .with_context(|| format!("invalid preferred source: {text}"))
            })
            .transpose()?;

        Ok(Self {
            dest,
            dev: raw.dev,
            gateway,
            prefsrc,
            metric: raw.metric.unwrap_or(0),
            protocol: raw.protocol.as_deref().unwrap_or("kernel").parse()?,
            scope: raw.scope.as_deref().unwrap_or("global").parse()?,
            kind: raw.kind.as_deref().unwrap_or("unicast").parse()?,
            table: raw.table.unwrap_or_else(|| "main".to_string()),
            flags: raw.flags,
        })
    }

    pub fn dest(&self) -> &RouteDest {
        &self.dest
    }

    pub fn dev(&self) -> &str {
        &self.dev
    }

    pub fn gateway(&self) -> Option<IpAddr> {
        self.gateway
    }

    pub fn prefsrc(&self) -> Option<IpAddr> {
        self.prefsrc
    }

    pub fn metric(&self) -> u32 {
        self.metric
    }

    pub fn protocol(&self) -> RouteProtocol {
        self.protocol
    }

    pub fn scope(&self) -> RouteScope {
        self.scope
    }

    pub fn kind(&self) -> RouteKind {
        self.kind
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// True for route kinds that drop traffic; the path walk treats these
    /// entries as if they did not exist.
    pub fn is_discarded(&self) -> bool {
        matches!(
            self.kind,
            RouteKind::Blackhole | RouteKind::Unreachable | RouteKind::Prohibit
        )
    }

    /// True when this is a connected-network route: the prefix reachable on
    /// a link directly attached to the router.
    pub fn is_connected_net(&self) -> bool {
        self.protocol == RouteProtocol::Kernel
            && self.scope == RouteScope::Link
            && matches!(self.dest, RouteDest::Net(_))
    }

    /// Longest-prefix-match test: the matched prefix length when this route
    /// covers `addr`. Family mismatches never match.
    pub fn matches(&self, addr: IpAddr) -> Option<u8> {
        match &self.dest {
            RouteDest::Default => Some(0),
            RouteDest::Net(net) => net.contains(&addr).then(|| net.prefix_len()),
            RouteDest::Host(host) => {
                (*host == addr).then(|| if addr.is_ipv4() { 32 } else { 128 })
            }
        }
    }
}

/// Policy routing rule from `ip --json rule`. Rules are carried in priority
/// order; the path walk itself consults only the `main` table.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRule {
    pub priority: i64,
    pub selector: BTreeMap<String, Value>,
    pub action: String,
    pub table: Option<String>,
}

impl PolicyRule {
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            bail!("malformed rule record: not a mapping");
        };
        let priority = map
            .get("priority")
            .and_then(Value::as_i64)
            .context("malformed rule record: missing priority")?;
        let action = map
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("lookup")
            .to_string();
        let table = map
            .get("table")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let selector = map
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "priority" | "action" | "table"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(Self {
            priority,
            selector,
            action,
            table,
        })
    }
}
