use std::net::IpAddr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::fleet::Fleet;
use crate::engine::router::Router;
use crate::error::TraceError;
use crate::model::{DataSource, Hop, TracePath};
use crate::runtime::mtr::MtrRunner;
use crate::runtime::transport::{extract_dev, CommandSpec, Transport};

/// Budget for one per-router interface probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Asks one router which interface it would use toward an address.
/// Implemented over the transport; tests substitute a scripted double.
pub trait RouterProbe {
    fn interface_for(&self, router_addr: &str, addr: IpAddr) -> Option<String>;
}

/// `RouterProbe` over `ip route get` via the configured transport.
pub struct TransportProbe<'a> {
    transport: &'a dyn Transport,
}

impl<'a> TransportProbe<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }
}

impl RouterProbe for TransportProbe<'_> {
    fn interface_for(&self, router_addr: &str, addr: IpAddr) -> Option<String> {
        let command = CommandSpec::new("ip", vec!["route".to_string(), "get".to_string(), addr.to_string()]);
        match self.transport.run(router_addr, &command, PROBE_TIMEOUT) {
            Ok(output) if output.success() => extract_dev(&output.stdout),
            Ok(output) => {
                debug!(router = router_addr, stderr = %output.stderr.trim(), "interface probe failed");
                None
            }
            Err(err) => {
                debug!(router = router_addr, "interface probe error: {err:#}");
                None
            }
        }
    }
}

/// Bidirectional path discovery for requests the forward simulation cannot
/// complete: trace controller to destination, trace the last Linux router on
/// that path back to the source, then reverse and splice the halves.
pub struct ReverseTracer<'a> {
    fleet: &'a Fleet,
    mtr: &'a MtrRunner<'a>,
    probe: Option<&'a dyn RouterProbe>,
    controller: IpAddr,
}

impl<'a> ReverseTracer<'a> {
    pub fn new(fleet: &'a Fleet, mtr: &'a MtrRunner<'a>, controller: IpAddr) -> Self {
        Self {
            fleet,
            mtr,
            probe: None,
            controller,
        }
    }

    /// Enable the interface-detection pass over interior routers.
    pub fn with_probe(mut self, probe: &'a dyn RouterProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn trace(&self, src: IpAddr, dst: IpAddr) -> Result<TracePath, TraceError> {
        info!(source = %src, destination = %dst, controller = %self.controller, "starting reverse path trace");

        let step1 = self.step1_controller_to_destination(src, dst)?;
        let Some(last_linux) = self.find_last_linux_router(&step1) else {
            warn!("no Linux routers found in controller-to-destination path");
            return Err(TraceError::NoLinuxRouters);
        };
        debug!(router = %last_linux, "last Linux router identified");

        let step2 = self.step2_router_to_source(&last_linux, src)?;
        let mut path = self.step3_splice(&step1, &step2, &last_linux, src, dst);
        path.renumber();
        path.link_neighbors();

        if let Some(probe) = self.probe {
            self.detect_interfaces(&mut path, src, dst, probe);
        }
        Ok(path)
    }

    /// Step 1: live trace from the controller to the original destination.
    /// The resulting path keeps every hop, annotated with Linux-router
    /// ownership from the fleet index. A probe that cannot complete means no
    /// path exists between the endpoints.
    fn step1_controller_to_destination(
        &self,
        src: IpAddr,
        dst: IpAddr,
    ) -> Result<TracePath, TraceError> {
        let controller_target = self.controller.to_string();
        let (all_hops, _linux_hops) = self
            .mtr
            .execute_and_filter(&controller_target, dst)
            .map_err(|err| {
                warn!("controller-to-destination trace failed: {err:#}");
                TraceError::NoRoute { src, dst }
            })?;

        let mut path = TracePath::new();
        let mut controller_hop = Hop::new(
            1,
            self.fleet.resolve(self.controller),
            controller_target,
        );
        controller_hop.data_source = DataSource::Mtr;
        controller_hop.rtt = Some(0.0);
        path.push(controller_hop);

        for probe_hop in &all_hops {
            let seq = path.len() as u32 + 1;
            let name = probe_hop
                .hostname
                .clone()
                .unwrap_or_else(|| probe_hop.address.clone());
            let mut hop = Hop::new(seq, name, probe_hop.address.clone());
            hop.is_router_owned = probe_hop
                .address
                .parse::<IpAddr>()
                .is_ok_and(|addr| self.fleet.is_linux_router_ip(addr));
            hop.data_source = DataSource::Mtr;
            hop.rtt = Some(probe_hop.rtt_ms);
            path.push(hop);
        }
        Ok(path)
    }

    /// Step 2: live trace from the last Linux router back to the original
    /// source.
    fn step2_router_to_source(
        &self,
        last_linux: &str,
        src: IpAddr,
    ) -> Result<TracePath, TraceError> {
        let (all_hops, linux_hops) = self
            .mtr
            .execute_and_filter(last_linux, src)
            .map_err(|err| {
                warn!("reverse trace from {last_linux} failed: {err:#}");
                TraceError::DestinationUnreachable(src)
            })?;

        if !linux_hops.is_empty() {
            let mut path = TracePath::new();
            for probe_hop in &linux_hops {
                let name = probe_hop
                    .hostname
                    .clone()
                    .unwrap_or_else(|| probe_hop.address.clone());
                let mut hop = Hop::new(probe_hop.hop, name, probe_hop.address.clone());
                hop.is_router_owned = true;
                hop.data_source = DataSource::Mtr;
                hop.rtt = Some(probe_hop.rtt_ms);
                path.push(hop);
            }
            debug!(hops = path.len(), "reverse trace found Linux routers");
            return Ok(path);
        }

        // No Linux routers on the return path. Usable only if the probe
        // actually reached the original source.
        let Some(reached) = all_hops
            .iter()
            .find(|probe_hop| probe_hop.address == src.to_string())
        else {
            return Err(TraceError::DestinationUnreachable(src));
        };
        let mut path = TracePath::new();
        let mut hop = Hop::new(1, self.fleet.resolve(src), src.to_string());
        hop.data_source = DataSource::Mtr;
        hop.rtt = Some(reached.rtt_ms);
        path.push(hop);
        debug!("reverse trace reached the source without interior Linux routers");
        Ok(path)
    }

    /// Step 3: compose the final source-to-destination path. Ordering:
    /// source, Step-2 hops reversed (minus the source itself), the last
    /// Linux router's hop from Step 1, destination with Step-1 timing.
    /// Interior hops not owned by Linux routers are dropped; the last Linux
    /// router is never dropped.
    fn step3_splice(
        &self,
        step1: &TracePath,
        step2: &TracePath,
        last_linux: &str,
        src: IpAddr,
        dst: IpAddr,
    ) -> TracePath {
        let src_text = src.to_string();
        let dst_text = dst.to_string();

        let mut staged: Vec<Hop> = Vec::new();
        let mut source_hop = Hop::new(1, src_text.clone(), src_text.clone());
        source_hop.data_source = DataSource::Mtr;
        source_hop.rtt = Some(0.0);
        staged.push(source_hop);

        for hop in step2.hops.iter().rev() {
            if hop.address != src_text {
                staged.push(hop.clone());
            }
        }

        // Match the last Linux router in Step 1 through the index rather
        // than by name, tolerating FQDN labels from the probe.
        for hop in &step1.hops {
            let Ok(addr) = hop.address.parse::<IpAddr>() else {
                continue;
            };
            if self.fleet.router_by_ip(addr) == Some(last_linux) {
                staged.push(hop.clone());
                break;
            }
        }

        let destination_rtt = step1
            .hops
            .iter()
            .find(|hop| hop.address == dst_text)
            .map(Hop::rtt_ms)
            .unwrap_or(0.0);
        let mut destination_hop = Hop::new(1, dst_text.clone(), dst_text.clone());
        destination_hop.data_source = DataSource::Mtr;
        destination_hop.rtt = Some(destination_rtt);
        staged.push(destination_hop);

        let mut path = TracePath::new();
        for hop in staged {
            let seq = path.len() as u32 + 1;
            if hop.address == src_text || hop.address == dst_text {
                let (name, owned) = match hop.address.parse::<IpAddr>() {
                    Ok(addr) => (
                        self.fleet.resolve(addr),
                        self.fleet.router_by_ip(addr).is_some(),
                    ),
                    Err(_) => (hop.address.clone(), false),
                };
                let mut endpoint = Hop::new(seq, name, hop.address.clone());
                endpoint.is_router_owned = owned;
                endpoint.data_source = hop.data_source;
                endpoint.rtt = hop.rtt;
                path.push(endpoint);
            } else if hop.name == last_linux {
                let mut kept = hop.clone();
                kept.seq = seq;
                kept.prev_hop = String::new();
                path.push(kept);
            } else {
                let Some(router) = hop
                    .address
                    .parse::<IpAddr>()
                    .ok()
                    .and_then(|addr| self.fleet.owner_router(addr))
                else {
                    continue;
                };
                if !router.is_linux() {
                    continue;
                }
                let mut kept = hop.clone();
                kept.seq = seq;
                kept.name = router.name().to_string();
                kept.prev_hop = String::new();
                path.push(kept);
            }
        }
        path
    }

    /// The Linux router closest to the destination on a path, identified
    /// through the fleet index.
    fn find_last_linux_router(&self, path: &TracePath) -> Option<String> {
        for hop in path.hops.iter().rev() {
            let Ok(addr) = hop.address.parse::<IpAddr>() else {
                continue;
            };
            let Some(name) = self.fleet.router_by_ip(addr) else {
                continue;
            };
            if self.fleet.get(name).is_some_and(Router::is_linux) {
                return Some(name.to_string());
            }
        }
        None
    }

    /// Optional pass asking each router hop for its interfaces toward the
    /// endpoints via `ip route get`.
    fn detect_interfaces(
        &self,
        path: &mut TracePath,
        src: IpAddr,
        dst: IpAddr,
        probe: &dyn RouterProbe,
    ) {
        for hop in &mut path.hops {
            if !hop.is_router_owned {
                continue;
            }
            debug!(router = %hop.name, address = %hop.address, "detecting interfaces");
            if let Some(dev) = probe.interface_for(&hop.address, src) {
                hop.incoming = dev;
            }
            if let Some(dev) = probe.interface_for(&hop.address, dst) {
                hop.outgoing_interface = dev;
            }
        }
    }
}
