use std::collections::BTreeSet;
use std::net::IpAddr;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::engine::fleet::{is_public, Fleet};
use crate::engine::router::Router;
use crate::error::TraceError;
use crate::model::hop::{
    DESTINATION_NAME, LOOP_SUFFIX, NO_ROUTE_ADDRESS, SOURCE_NAME, UNREACHABLE_MARKER,
};
use crate::model::{DataSource, Hop, TracePath};
use crate::runtime::mtr::MtrRunner;

/// Upper bound on path length, matching the probe tool's hop limit.
pub const MAX_HOPS: usize = 30;

/// How a forward walk terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEnd {
    Reached,
    NoRoute,
    LoopDetected,
    HopLimit,
}

#[derive(Debug)]
pub struct Simulation {
    pub path: TracePath,
    pub end: WalkEnd,
}

#[derive(Debug)]
pub struct FallbackTrace {
    pub path: TracePath,
    pub used_mtr: bool,
    pub no_linux_routers: bool,
    /// Set when the path is the simulated walk itself (no live trace ran).
    pub end: Option<WalkEnd>,
}

/// Candidate next step out of a router: the owning router of the next
/// address (when known), the address itself, and the departing interface.
struct NextStep {
    router: Option<String>,
    via: Option<IpAddr>,
    outgoing: Option<String>,
}

/// Hop-by-hop path construction over the loaded fleet, emulating the
/// kernel's forwarding decisions per router.
pub struct ForwardSimulator<'a> {
    fleet: &'a Fleet,
}

impl<'a> ForwardSimulator<'a> {
    pub fn new(fleet: &'a Fleet) -> Self {
        Self { fleet }
    }

    /// Walk from `src` to `dst`. The source must be reachable by some
    /// router; the destination may be any address.
    pub fn simulate(&self, src: IpAddr, dst: IpAddr) -> Result<Simulation, TraceError> {
        if !self.fleet.is_reachable_by_any(src) {
            return Err(TraceError::SourceNotFound(src));
        }

        let src_owner = self.fleet.owner_router(src);
        let dst_owner = self.fleet.owner_router(dst);

        if let (Some(src_router), Some(dst_router)) = (src_owner, dst_owner) {
            if src_router.name() == dst_router.name() {
                debug!(router = src_router.name(), "source and destination on one router");
                return Ok(Simulation {
                    path: self.shortcut_path(src_router, src, dst),
                    end: WalkEnd::Reached,
                });
            }
        }

        let mut path = TracePath::new();
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut current = self.seed_path(&mut path, src, src_owner)?;
        visited.insert(current.name().to_string());

        while path.len() < MAX_HOPS {
            let (reachable, owned) = current.is_destination_reachable(dst);
            if reachable {
                self.append_terminal(&mut path, current, dst, owned);
                return Ok(Simulation {
                    path,
                    end: WalkEnd::Reached,
                });
            }

            let step = self.next_step(current, dst);
            let seq = path.len() as u32 + 1;

            let Some(via) = step.via else {
                path.push(Hop::new(seq, UNREACHABLE_MARKER, NO_ROUTE_ADDRESS));
                return Ok(Simulation {
                    path,
                    end: WalkEnd::NoRoute,
                });
            };
            let outgoing = step.outgoing.unwrap_or_default();

            let Some(next_name) = step.router else {
                if via == dst && current.metadata().is_gateway() && is_public(dst) {
                    // Direct internet egress from a gateway without a route
                    // entry for the destination.
                    retro_patch(&mut path, &outgoing);
                    let mut hop = Hop::new(seq, DESTINATION_NAME, dst.to_string());
                    hop.incoming = outgoing;
                    hop.connected_router = current.name().to_string();
                    path.push(hop);
                    return Ok(Simulation {
                        path,
                        end: WalkEnd::Reached,
                    });
                }
                path.push(Hop::new(seq, UNREACHABLE_MARKER, NO_ROUTE_ADDRESS));
                return Ok(Simulation {
                    path,
                    end: WalkEnd::NoRoute,
                });
            };

            if visited.contains(&next_name) {
                let mut hop = Hop::new(seq, next_name, format!("{via}{LOOP_SUFFIX}"));
                hop.incoming = outgoing;
                path.push(hop);
                return Ok(Simulation {
                    path,
                    end: WalkEnd::LoopDetected,
                });
            }

            retro_patch(&mut path, &outgoing);

            let next_router = self
                .fleet
                .get(&next_name)
                .ok_or_else(|| anyhow!("router {next_name} missing from fleet index"))?;
            // Peer-side incoming interface: the next router's connected
            // prefix covering our departing address, else the outgoing name.
            let incoming = current
                .interface_address(&outgoing)
                .and_then(|addr| {
                    next_router
                        .connected_interface_for(addr)
                        .map(ToString::to_string)
                })
                .unwrap_or_else(|| outgoing.clone());

            let mut hop = Hop::new(seq, next_router.name(), via.to_string());
            hop.incoming = incoming;
            hop.is_router_owned = self.fleet.router_by_ip(via).is_some();
            path.push(hop);
            visited.insert(next_name);
            current = next_router;

            if via == dst {
                return Ok(Simulation {
                    path,
                    end: WalkEnd::Reached,
                });
            }
        }

        Ok(Simulation {
            path,
            end: WalkEnd::HopLimit,
        })
    }

    /// Forward walk with a live-trace fallback when the simulated path ends
    /// in a failure marker.
    pub fn simulate_with_fallback(
        &self,
        mtr: &MtrRunner<'_>,
        src: IpAddr,
        dst: IpAddr,
    ) -> Result<FallbackTrace, TraceError> {
        let simulation = self.simulate(src, dst)?;
        if !simulation.path.has_failure_marker() {
            return Ok(FallbackTrace {
                path: simulation.path,
                used_mtr: false,
                no_linux_routers: false,
                end: Some(simulation.end),
            });
        }
        info!("simulation incomplete, falling back to live trace");

        let source_router = simulation
            .path
            .last_router_hop()
            .map(|hop| hop.name.clone())
            .or_else(|| self.fleet.router_by_ip(src).map(ToString::to_string))
            .or_else(|| {
                self.fleet
                    .find_reaching_router(src)
                    .map(|router| router.name().to_string())
            })
            .ok_or(TraceError::SourceNotFound(src))?;

        let (all_hops, linux_hops) = mtr
            .execute_and_filter(&source_router, dst)
            .map_err(|err| {
                warn!("live trace fallback from {source_router} failed: {err:#}");
                TraceError::NoRoute { src, dst }
            })?;

        if linux_hops.is_empty() {
            // The trace ran but crossed no known Linux router. Keep the
            // result only if the destination itself was reached.
            let Some(reached) = all_hops
                .iter()
                .find(|hop| hop.address == dst.to_string())
            else {
                return Err(TraceError::DestinationUnreachable(dst));
            };
            let mut path = TracePath::new();
            let mut src_hop = Hop::new(1, self.fleet.resolve(src), src.to_string());
            src_hop.is_router_owned = self.fleet.router_by_ip(src).is_some();
            src_hop.data_source = DataSource::Mtr;
            src_hop.rtt = Some(0.0);
            path.push(src_hop);
            let mut dst_hop = Hop::new(2, self.fleet.resolve(dst), dst.to_string());
            dst_hop.data_source = DataSource::Mtr;
            dst_hop.rtt = Some(reached.rtt_ms);
            path.push(dst_hop);
            return Ok(FallbackTrace {
                path,
                used_mtr: true,
                no_linux_routers: true,
                end: None,
            });
        }

        let mut path = TracePath::new();
        let mut src_hop = Hop::new(1, self.fleet.resolve(src), src.to_string());
        src_hop.is_router_owned = self.fleet.router_by_ip(src).is_some();
        path.push(src_hop);
        for probe in &linux_hops {
            let seq = path.len() as u32 + 1;
            let name = probe
                .hostname
                .clone()
                .unwrap_or_else(|| probe.address.clone());
            let mut hop = Hop::new(seq, name, probe.address.clone());
            hop.is_router_owned = true;
            hop.data_source = DataSource::Mtr;
            hop.rtt = Some(probe.rtt_ms);
            path.push(hop);
        }
        Ok(FallbackTrace {
            path,
            used_mtr: true,
            no_linux_routers: false,
            end: None,
        })
    }

    /// Legacy single-hop surface for source and destination owned by the
    /// same router.
    fn shortcut_path(&self, router: &Router, src: IpAddr, dst: IpAddr) -> TracePath {
        let src_iface = router.owning_interface(src).unwrap_or("");
        let dst_iface = router.owning_interface(dst).unwrap_or("");
        let mut hop = Hop::new(
            1,
            format!("{} -> {}", self.fleet.resolve(src), self.fleet.resolve(dst)),
            format!("{src} -> {dst}"),
        );
        hop.incoming = format!("{src_iface} -> {dst_iface}");
        let mut path = TracePath::new();
        path.push(hop);
        path
    }

    /// Seed the path: a router hop when the source is owned, otherwise a
    /// `source` pseudo-hop followed by the starting router's own hop.
    fn seed_path(
        &self,
        path: &mut TracePath,
        src: IpAddr,
        src_owner: Option<&'a Router>,
    ) -> Result<&'a Router, TraceError> {
        if let Some(router) = src_owner {
            let iface = router.primary_interface_for(src).unwrap_or("");
            let mut hop = Hop::new(1, router.name(), src.to_string());
            hop.incoming = iface.to_string();
            hop.is_router_owned = true;
            path.push(hop);
            return Ok(router);
        }

        let router = self
            .fleet
            .find_reaching_router(src)
            .ok_or(TraceError::SourceNotFound(src))?;
        let iface = router
            .connected_interface_for(src)
            .unwrap_or("")
            .to_string();

        let mut source_hop = Hop::new(1, SOURCE_NAME, src.to_string());
        source_hop.incoming = iface.clone();
        source_hop.connected_router = router.name().to_string();
        path.push(source_hop);

        let router_addr = router
            .interface_address(&iface)
            .or_else(|| router.interfaces().values().next().copied());
        if let Some(addr) = router_addr {
            let mut hop = Hop::new(2, router.name(), addr.to_string());
            hop.incoming = iface;
            hop.is_router_owned = true;
            path.push(hop);
        }
        Ok(router)
    }

    /// Terminal append once the destination is directly reachable from the
    /// current router.
    fn append_terminal(&self, path: &mut TracePath, current: &Router, dst: IpAddr, owned: bool) {
        let outgoing = current
            .best_route(dst)
            .map(|route| route.dev().to_string())
            .or_else(|| {
                (current.metadata().is_gateway() && is_public(dst))
                    .then(|| current.public_interface().unwrap_or_default().to_string())
            })
            .unwrap_or_default();
        retro_patch(path, &outgoing);

        if path.contains_address(&dst.to_string()) {
            return;
        }
        let seq = path.len() as u32 + 1;

        if owned {
            let hop = match self.fleet.owner_router(dst) {
                Some(dst_router) => {
                    let iface = dst_router.primary_interface_for(dst).unwrap_or("");
                    let mut hop = Hop::new(seq, dst_router.name(), dst.to_string());
                    hop.incoming = iface.to_string();
                    hop.is_router_owned = true;
                    hop
                }
                // Owned per the current router's interface facts but absent
                // from the fleet index.
                None => {
                    let mut hop = Hop::new(seq, current.name(), dst.to_string());
                    hop.is_router_owned = true;
                    hop
                }
            };
            path.push(hop);
        } else {
            let iface = current
                .connected_interface_for(dst)
                .map(ToString::to_string)
                .or_else(|| {
                    (current.metadata().is_gateway() && is_public(dst))
                        .then(|| current.public_interface().unwrap_or_default().to_string())
                })
                .unwrap_or_default();
            let mut hop = Hop::new(seq, DESTINATION_NAME, dst.to_string());
            hop.incoming = iface;
            hop.connected_router = current.name().to_string();
            path.push(hop);
        }
    }

    /// Next-hop selection on one router: follow the best route's gateway to
    /// its owning router, or a direct route to a router owning the
    /// destination, or the gateway-internet egress.
    fn next_step(&self, current: &Router, dst: IpAddr) -> NextStep {
        let Some(route) = current.best_route(dst) else {
            if current.metadata().is_gateway() && is_public(dst) {
                if let Some(iface) = current.public_interface() {
                    return NextStep {
                        router: None,
                        via: Some(dst),
                        outgoing: Some(iface.to_string()),
                    };
                }
            }
            return NextStep {
                router: None,
                via: None,
                outgoing: None,
            };
        };

        let outgoing = Some(route.dev().to_string());
        if let Some(gateway) = route.gateway() {
            return NextStep {
                router: self.fleet.router_by_ip(gateway).map(ToString::to_string),
                via: Some(gateway),
                outgoing,
            };
        }

        // Interface-only route: the destination may sit directly on another
        // router's interface.
        for other in self.fleet.routers() {
            if other.name() != current.name()
                && other.interfaces().values().any(|addr| *addr == dst)
            {
                return NextStep {
                    router: Some(other.name().to_string()),
                    via: Some(dst),
                    outgoing,
                };
            }
        }
        NextStep {
            router: None,
            via: None,
            outgoing,
        }
    }
}

/// Record the departing interface on the previously appended router hop now
/// that the next step is known.
fn retro_patch(path: &mut TracePath, outgoing: &str) {
    if let Some(prev) = path.last_mut() {
        if prev.is_router_hop() {
            prev.outgoing_interface = outgoing.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Outcome;
    use crate::model::{Route, RouterKind, RouterMetadata};
    use crate::runtime::transport::test_support::ScriptedTransport;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    fn make_router(name: &str, routes: &[Value], metadata: RouterMetadata) -> Router {
        let parsed: Vec<Route> = routes
            .iter()
            .map(|value| Route::from_value(value).unwrap())
            .collect();
        let mut full: BTreeMap<String, Vec<IpAddr>> = BTreeMap::new();
        for route in &parsed {
            if let Some(prefsrc) = route.prefsrc() {
                full.entry(route.dev().to_string()).or_default().push(prefsrc);
            }
        }
        Router::new(name, parsed, Vec::new(), metadata, full)
    }

    fn single_router_fleet() -> Fleet {
        Fleet::from_routers(vec![make_router(
            "r1",
            &[json!({"dst": "10.1.1.0/24", "dev": "eth0", "prefsrc": "10.1.1.1",
                     "protocol": "kernel", "scope": "link"})],
            RouterMetadata::default(),
        )])
        .unwrap()
    }

    fn two_router_fleet() -> Fleet {
        Fleet::from_routers(vec![
            make_router(
                "r1",
                &[
                    json!({"dst": "10.1.1.0/24", "dev": "eth0", "prefsrc": "10.1.1.1",
                           "protocol": "kernel", "scope": "link"}),
                    json!({"dst": "10.100.0.0/24", "dev": "eth1", "prefsrc": "10.100.0.1",
                           "protocol": "kernel", "scope": "link"}),
                    json!({"dst": "default", "dev": "eth1", "gateway": "10.100.0.2"}),
                ],
                RouterMetadata::default(),
            ),
            make_router(
                "r2",
                &[
                    json!({"dst": "10.100.0.0/24", "dev": "eth0", "prefsrc": "10.100.0.2",
                           "protocol": "kernel", "scope": "link"}),
                    json!({"dst": "10.2.1.0/24", "dev": "eth1", "prefsrc": "10.2.1.1",
                           "protocol": "kernel", "scope": "link"}),
                ],
                RouterMetadata::default(),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn same_segment_hop() {
        let fleet = single_router_fleet();
        let sim = ForwardSimulator::new(&fleet)
            .simulate(ip("10.1.1.10"), ip("10.1.1.20"))
            .unwrap();
        assert_eq!(sim.end, WalkEnd::Reached);

        let hops = &sim.path.hops;
        assert_eq!(hops.len(), 3);
        assert_eq!(hops[0].name, SOURCE_NAME);
        assert_eq!(hops[0].incoming, "eth0");
        assert_eq!(hops[0].connected_router, "r1");
        assert!(!hops[0].is_router_owned);

        assert_eq!(hops[1].name, "r1");
        assert_eq!(hops[1].address, "10.1.1.1");
        assert_eq!(hops[1].incoming, "eth0");
        assert_eq!(hops[1].outgoing_interface, "eth0");
        assert!(hops[1].is_router_owned);

        assert_eq!(hops[2].name, DESTINATION_NAME);
        assert_eq!(hops[2].incoming, "eth0");
        assert_eq!(hops[2].connected_router, "r1");

        let seqs: Vec<u32> = hops.iter().map(|hop| hop.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn two_router_path_with_connected_source() {
        let fleet = two_router_fleet();
        let sim = ForwardSimulator::new(&fleet)
            .simulate(ip("10.1.1.10"), ip("10.2.1.10"))
            .unwrap();
        assert_eq!(sim.end, WalkEnd::Reached);

        let hops = &sim.path.hops;
        assert_eq!(hops.len(), 4);
        assert_eq!(hops[0].name, SOURCE_NAME);
        assert_eq!(hops[1].name, "r1");
        assert_eq!(hops[1].incoming, "eth0");
        assert_eq!(hops[1].outgoing_interface, "eth1");
        assert_eq!(hops[2].name, "r2");
        assert_eq!(hops[2].address, "10.100.0.2");
        assert_eq!(hops[2].incoming, "eth0");
        assert_eq!(hops[2].outgoing_interface, "eth1");
        assert!(hops[2].is_router_owned);
        assert_eq!(hops[3].name, DESTINATION_NAME);
        assert_eq!(hops[3].incoming, "eth1");
        assert_eq!(hops[3].connected_router, "r2");
    }

    #[test]
    fn blackhole_route_is_ignored() {
        let fleet = Fleet::from_routers(vec![make_router(
            "r1",
            &[
                json!({"dst": "10.1.1.0/24", "dev": "eth0", "type": "blackhole"}),
                json!({"dst": "10.1.1.0/24", "dev": "eth0", "prefsrc": "10.1.1.1",
                       "protocol": "kernel", "scope": "link"}),
            ],
            RouterMetadata::default(),
        )])
        .unwrap();
        let sim = ForwardSimulator::new(&fleet)
            .simulate(ip("10.1.1.10"), ip("10.1.1.20"))
            .unwrap();
        assert_eq!(sim.end, WalkEnd::Reached);
        assert_eq!(sim.path.len(), 3);
        assert_eq!(sim.path.hops[2].name, DESTINATION_NAME);
    }

    #[test]
    fn unreachable_destination_ends_with_marker() {
        let fleet = single_router_fleet();
        let sim = ForwardSimulator::new(&fleet)
            .simulate(ip("10.1.1.10"), ip("192.0.2.5"))
            .unwrap();
        assert_eq!(sim.end, WalkEnd::NoRoute);

        let last = sim.path.last().unwrap();
        assert_eq!(last.name, UNREACHABLE_MARKER);
        assert_eq!(last.address, NO_ROUTE_ADDRESS);
        assert!(sim.path.has_failure_marker());
    }

    #[test]
    fn gateway_reaches_public_destination() {
        let fleet = Fleet::from_routers(vec![make_router(
            "r1",
            &[
                json!({"dst": "10.1.1.0/24", "dev": "eth0", "prefsrc": "10.1.1.1",
                       "protocol": "kernel", "scope": "link"}),
                json!({"dst": "203.0.113.0/24", "dev": "eth2", "prefsrc": "203.0.113.5",
                       "protocol": "kernel", "scope": "link"}),
            ],
            RouterMetadata {
                kind: RouterKind::Gateway,
                ..RouterMetadata::default()
            },
        )])
        .unwrap();
        let sim = ForwardSimulator::new(&fleet)
            .simulate(ip("10.1.1.10"), ip("8.8.8.8"))
            .unwrap();
        assert_eq!(sim.end, WalkEnd::Reached);

        let hops = &sim.path.hops;
        assert_eq!(hops.len(), 3);
        assert_eq!(hops[1].name, "r1");
        assert_eq!(hops[1].outgoing_interface, "eth2");
        assert_eq!(hops[2].name, DESTINATION_NAME);
        assert_eq!(hops[2].address, "8.8.8.8");
        assert_eq!(hops[2].incoming, "eth2");
        assert_eq!(hops[2].connected_router, "r1");
    }

    #[test]
    fn single_router_shortcut() {
        let r1 = Router::new(
            "r1",
            vec![Route::from_value(&json!({
                "dst": "10.1.1.0/24", "dev": "eth0", "prefsrc": "10.1.1.1",
                "protocol": "kernel", "scope": "link"
            }))
            .unwrap()],
            Vec::new(),
            RouterMetadata::default(),
            [(
                "eth0".to_string(),
                vec![ip("10.1.1.1"), ip("10.1.1.2")],
            )]
            .into(),
        );
        let fleet = Fleet::from_routers(vec![r1]).unwrap();
        let sim = ForwardSimulator::new(&fleet)
            .simulate(ip("10.1.1.1"), ip("10.1.1.2"))
            .unwrap();
        assert_eq!(sim.path.len(), 1);
        let hop = &sim.path.hops[0];
        assert_eq!(hop.name, "r1 -> r1");
        assert_eq!(hop.address, "10.1.1.1 -> 10.1.1.2");
        assert_eq!(hop.incoming, "eth0 -> eth0");
    }

    #[test]
    fn routing_loop_is_detected() {
        let fleet = Fleet::from_routers(vec![
            make_router(
                "r1",
                &[
                    json!({"dst": "10.100.0.0/24", "dev": "eth1", "prefsrc": "10.100.0.1",
                           "protocol": "kernel", "scope": "link"}),
                    json!({"dst": "default", "dev": "eth1", "gateway": "10.100.0.2"}),
                ],
                RouterMetadata::default(),
            ),
            make_router(
                "r2",
                &[
                    json!({"dst": "10.100.0.0/24", "dev": "eth0", "prefsrc": "10.100.0.2",
                           "protocol": "kernel", "scope": "link"}),
                    json!({"dst": "default", "dev": "eth0", "gateway": "10.100.0.1"}),
                ],
                RouterMetadata::default(),
            ),
        ])
        .unwrap();
        let sim = ForwardSimulator::new(&fleet)
            .simulate(ip("10.100.0.1"), ip("192.0.2.9"))
            .unwrap();
        assert_eq!(sim.end, WalkEnd::LoopDetected);

        let hops = &sim.path.hops;
        assert_eq!(hops[0].name, "r1");
        assert_eq!(hops[1].name, "r2");
        assert_eq!(hops[2].name, "r1");
        assert_eq!(hops[2].address, format!("10.100.0.1{LOOP_SUFFIX}"));
        let seqs: Vec<u32> = hops.iter().map(|hop| hop.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn hop_limit_is_honored() {
        let mut routers = Vec::new();
        for index in 0..40u32 {
            routers.push(make_router(
                &format!("r{index:02}"),
                &[
                    json!({"dst": format!("10.0.{index}.0/24"), "dev": "eth0",
                           "prefsrc": format!("10.0.{index}.1"),
                           "protocol": "kernel", "scope": "link"}),
                    json!({"dst": "default", "dev": "eth0",
                           "gateway": format!("10.0.{}.1", index + 1)}),
                ],
                RouterMetadata::default(),
            ));
        }
        let fleet = Fleet::from_routers(routers).unwrap();
        let sim = ForwardSimulator::new(&fleet)
            .simulate(ip("10.0.0.1"), ip("192.0.2.9"))
            .unwrap();
        assert_eq!(sim.end, WalkEnd::HopLimit);
        assert_eq!(sim.path.len(), MAX_HOPS);
        assert_eq!(sim.path.max_seq(), MAX_HOPS as u32);
    }

    #[test]
    fn unknown_source_is_rejected() {
        let fleet = single_router_fleet();
        let err = ForwardSimulator::new(&fleet)
            .simulate(ip("172.31.0.9"), ip("10.1.1.20"))
            .unwrap_err();
        assert!(matches!(err, TraceError::SourceNotFound(_)));
    }

    #[test]
    fn fallback_converts_linux_hops() {
        let report = "\
HOST: r1                          Loss%   Snt   Last   Avg  Best  Wrst StDev
  1.|-- 10.100.0.2                 0.0%     1    2.0   2.0   2.0   2.0   0.0
  2.|-- 192.0.2.5                  0.0%     1    9.5   9.5   9.5   9.5   0.0
";
        let fleet = two_router_fleet();
        let transport = ScriptedTransport::new(vec![ScriptedTransport::ok(report)]);
        let runner = MtrRunner::new(&transport, &fleet, false).resolve_hostnames(false);

        let result = ForwardSimulator::new(&fleet)
            .simulate_with_fallback(&runner, ip("10.1.1.1"), ip("192.0.2.5"))
            .unwrap();
        assert!(result.used_mtr);
        assert!(!result.no_linux_routers);

        let hops = &result.path.hops;
        assert_eq!(hops[0].address, "10.1.1.1");
        assert!(hops[0].is_router_owned);
        assert_eq!(hops[1].name, "10.100.0.2");
        assert_eq!(hops[1].address, "10.100.0.2");
        assert_eq!(hops[1].data_source, DataSource::Mtr);
        assert_eq!(hops[1].rtt, Some(2.0));
        // The raw trace's non-fleet hop was filtered out.
        assert_eq!(hops.len(), 2);

        // The probe ran from the last router hop of the partial path.
        let calls = transport.calls.borrow();
        assert_eq!(calls[0].0, "r2");
    }

    #[test]
    fn fallback_without_linux_hops_requires_reached_destination() {
        let reached = "\
HOST: r1                          Loss%   Snt   Last   Avg  Best  Wrst StDev
  1.|-- 198.51.100.1               0.0%     1    3.0   3.0   3.0   3.0   0.0
  2.|-- 192.0.2.5                  0.0%     1    7.5   7.5   7.5   7.5   0.0
";
        let fleet = single_router_fleet();
        let transport = ScriptedTransport::new(vec![ScriptedTransport::ok(reached)]);
        let runner = MtrRunner::new(&transport, &fleet, false).resolve_hostnames(false);
        let result = ForwardSimulator::new(&fleet)
            .simulate_with_fallback(&runner, ip("10.1.1.1"), ip("192.0.2.5"))
            .unwrap();
        assert!(result.no_linux_routers);
        assert_eq!(result.path.len(), 2);
        assert_eq!(result.path.hops[1].rtt, Some(7.5));

        let missed = "\
HOST: r1                          Loss%   Snt   Last   Avg  Best  Wrst StDev
  1.|-- 198.51.100.1               0.0%     1    3.0   3.0   3.0   3.0   0.0
";
        let transport = ScriptedTransport::new(vec![ScriptedTransport::ok(missed)]);
        let runner = MtrRunner::new(&transport, &fleet, false).resolve_hostnames(false);
        let err = ForwardSimulator::new(&fleet)
            .simulate_with_fallback(&runner, ip("10.1.1.1"), ip("192.0.2.5"))
            .unwrap_err();
        assert!(matches!(err, TraceError::DestinationUnreachable(_)));
    }

    #[test]
    fn fallback_execution_failure_maps_to_no_path() {
        let fleet = single_router_fleet();
        let transport =
            ScriptedTransport::new(vec![ScriptedTransport::failed("ssh: connection refused")]);
        let runner = MtrRunner::new(&transport, &fleet, false).resolve_hostnames(false);

        let err = ForwardSimulator::new(&fleet)
            .simulate_with_fallback(&runner, ip("10.1.1.1"), ip("192.0.2.5"))
            .unwrap_err();
        assert!(matches!(err, TraceError::NoRoute { .. }));
        assert_eq!(err.outcome(), Outcome::NoPath);
    }
}
