use serde::{Deserialize, Serialize};

/// Name used for the seeded pseudo-hop at the start of a path whose source
/// address is not router-owned.
pub const SOURCE_NAME: &str = "source";
/// Name used for the terminal pseudo-hop when the destination is reached on
/// a connected network rather than a router interface.
pub const DESTINATION_NAME: &str = "destination";
/// Name of the unreachable marker hop.
pub const UNREACHABLE_MARKER: &str = "* * *";
/// Address column of the unreachable marker hop.
pub const NO_ROUTE_ADDRESS: &str = "No route";
/// Suffix appended to the address column when a routing loop is detected.
pub const LOOP_SUFFIX: &str = " (loop detected)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Simulated,
    Mtr,
}

/// One step on a discovered path.
///
/// A single record covers router hops, the source/destination pseudo-hops,
/// the single-router shortcut (`"a -> b"` name/address/interface), and the
/// `* * *` marker; empty strings stand for fields that do not apply. The
/// serde field names are the wire layout of the structured output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    #[serde(rename = "hop")]
    pub seq: u32,
    #[serde(rename = "router_name")]
    pub name: String,
    #[serde(rename = "ip_address")]
    pub address: String,
    #[serde(rename = "interface")]
    pub incoming: String,
    pub is_router_owned: bool,
    pub connected_router: String,
    #[serde(default)]
    pub prev_hop: String,
    #[serde(default)]
    pub next_hop: String,
    pub outgoing_interface: String,
    pub data_source: DataSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtt: Option<f64>,
}

impl Hop {
    pub fn new(seq: u32, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            seq,
            name: name.into(),
            address: address.into(),
            incoming: String::new(),
            is_router_owned: false,
            connected_router: String::new(),
            prev_hop: String::new(),
            next_hop: String::new(),
            outgoing_interface: String::new(),
            data_source: DataSource::Simulated,
            rtt: None,
        }
    }

    pub fn is_marker(&self) -> bool {
        self.name == UNREACHABLE_MARKER
    }

    pub fn is_shortcut(&self) -> bool {
        self.name.contains(" -> ")
    }

    pub fn is_pseudo(&self) -> bool {
        self.name == SOURCE_NAME || self.name == DESTINATION_NAME
    }

    /// A hop naming an actual router, as opposed to markers, endpoints, and
    /// the single-router shortcut surface.
    pub fn is_router_hop(&self) -> bool {
        !self.is_marker() && !self.is_shortcut() && !self.is_pseudo()
    }

    pub fn is_loop_marker(&self) -> bool {
        self.address.ends_with(LOOP_SUFFIX)
    }

    pub fn rtt_ms(&self) -> f64 {
        self.rtt.unwrap_or(0.0)
    }
}

/// An ordered sequence of hops produced by one simulation or trace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TracePath {
    pub hops: Vec<Hop>,
}

impl TracePath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hop: Hop) {
        self.hops.push(hop);
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn last(&self) -> Option<&Hop> {
        self.hops.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut Hop> {
        self.hops.last_mut()
    }

    pub fn max_seq(&self) -> u32 {
        self.hops.iter().map(|hop| hop.seq).max().unwrap_or(0)
    }

    /// True when the walk halted without a route.
    pub fn has_failure_marker(&self) -> bool {
        self.hops
            .iter()
            .any(|hop| hop.is_marker() || hop.address == NO_ROUTE_ADDRESS)
    }

    pub fn has_loop_marker(&self) -> bool {
        self.hops.iter().any(Hop::is_loop_marker)
    }

    pub fn is_complete(&self) -> bool {
        !self.is_empty() && !self.has_failure_marker() && !self.has_loop_marker()
    }

    /// The last hop naming an actual router, skipping endpoints, markers,
    /// and the shortcut surface.
    pub fn last_router_hop(&self) -> Option<&Hop> {
        self.hops.iter().rev().find(|hop| hop.is_router_hop())
    }

    pub fn contains_address(&self, address: &str) -> bool {
        self.hops.iter().any(|hop| {
            hop.address == address
                || hop
                    .address
                    .split_once(" -> ")
                    .is_some_and(|(first, _)| first == address)
        })
    }

    /// Renumber hops 1..=n in order.
    pub fn renumber(&mut self) {
        for (index, hop) in self.hops.iter_mut().enumerate() {
            hop.seq = index as u32 + 1;
        }
    }

    /// Populate `prev_hop` in a forward pass and `next_hop` in a backward
    /// pass over the whole path.
    pub fn link_neighbors(&mut self) {
        let mut prev_name = String::new();
        for hop in &mut self.hops {
            hop.prev_hop = prev_name.clone();
            prev_name = hop.name.clone();
        }
        let mut next_name = String::new();
        for hop in self.hops.iter_mut().rev() {
            hop.next_hop = next_name.clone();
            next_name = hop.name.clone();
        }
    }
}
