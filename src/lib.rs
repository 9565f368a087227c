pub mod engine;
pub mod error;
pub mod format;
pub mod model;
pub mod runtime;

use std::net::IpAddr;

use tracing::info;

use crate::engine::forward::{ForwardSimulator, Simulation, WalkEnd};
use crate::engine::reverse::{ReverseTracer, TransportProbe};
use crate::engine::Fleet;
use crate::error::{Outcome, TraceError};
use crate::model::TracePath;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::mtr::MtrRunner;
use crate::runtime::transport::{SshMode, SshTransport};

/// Which discovery strategy produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    SoftwareOnly,
    Forward,
    ForwardMtr,
    Reverse,
}

impl TraceMode {
    /// Suffix appended to the text banner.
    pub fn banner_note(self) -> &'static str {
        match self {
            Self::SoftwareOnly => " (using software simulation only)",
            Self::Forward => " (using forward tracing)",
            Self::ForwardMtr => " (using forward path tracing with mtr tool)",
            Self::Reverse => " (using reverse path tracing)",
        }
    }
}

/// Result of one trace request: the discovered path, the strategy used, and
/// the caller-visible outcome.
#[derive(Debug)]
pub struct TraceReport {
    pub path: TracePath,
    pub mode: TraceMode,
    pub outcome: Outcome,
}

/// Load the fleet and run one trace request with the configured strategy.
pub fn run(config: &RuntimeConfig, src: IpAddr, dst: IpAddr) -> Result<TraceReport, TraceError> {
    let fleet = Fleet::load(&config.tsim_facts)
        .map_err(|err| TraceError::FactsDirectory(format!("{err:#}")))?;
    info!(routers = fleet.len(), facts = %config.tsim_facts.display(), "fleet loaded");
    run_with_fleet(&fleet, config, src, dst)
}

/// Run one trace request against an already loaded fleet.
pub fn run_with_fleet(
    fleet: &Fleet,
    config: &RuntimeConfig,
    src: IpAddr,
    dst: IpAddr,
) -> Result<TraceReport, TraceError> {
    let simulator = ForwardSimulator::new(fleet);

    if config.software_simulation_only {
        let simulation = simulator.simulate(src, dst)?;
        let outcome = outcome_for_walk(fleet, &simulation, dst);
        return Ok(TraceReport {
            path: simulation.path,
            mode: TraceMode::SoftwareOnly,
            outcome,
        });
    }

    let transport = build_transport(config);
    let user_mode = config.ssh.mode == SshMode::User;

    if config.force_forward_trace || !config.enable_reverse_trace {
        if config.enable_mtr_fallback {
            let mtr = MtrRunner::new(&transport, fleet, user_mode);
            let fallback = simulator.simulate_with_fallback(&mtr, src, dst)?;
            let outcome = if fallback.no_linux_routers {
                Outcome::NoLinuxRouters
            } else {
                match fallback.end {
                    Some(end) => walk_outcome(fleet, end, dst),
                    None => Outcome::Ok,
                }
            };
            let mode = if fallback.used_mtr {
                TraceMode::ForwardMtr
            } else {
                TraceMode::Forward
            };
            return Ok(TraceReport {
                path: fallback.path,
                mode,
                outcome,
            });
        }
        let simulation = simulator.simulate(src, dst)?;
        let outcome = outcome_for_walk(fleet, &simulation, dst);
        return Ok(TraceReport {
            path: simulation.path,
            mode: TraceMode::Forward,
            outcome,
        });
    }

    let controller = config
        .controller_ip
        .or_else(|| fleet.controller_address())
        .ok_or(TraceError::MissingController)?;
    let mtr = MtrRunner::new(&transport, fleet, user_mode);
    let probe = TransportProbe::new(&transport);
    let tracer = ReverseTracer::new(fleet, &mtr, controller).with_probe(&probe);
    let path = tracer.trace(src, dst)?;
    Ok(TraceReport {
        path,
        mode: TraceMode::Reverse,
        outcome: Outcome::Ok,
    })
}

fn outcome_for_walk(fleet: &Fleet, simulation: &Simulation, dst: IpAddr) -> Outcome {
    walk_outcome(fleet, simulation.end, dst)
}

/// A walk that halted on a missing route is `no_path` when some router could
/// reach the destination (a fleet misconfiguration) and `not_found` when the
/// destination is simply outside the known network.
fn walk_outcome(fleet: &Fleet, end: WalkEnd, dst: IpAddr) -> Outcome {
    match end {
        WalkEnd::Reached => Outcome::Ok,
        WalkEnd::LoopDetected | WalkEnd::HopLimit => Outcome::NoPath,
        WalkEnd::NoRoute => {
            if fleet.is_reachable_by_any(dst) {
                Outcome::NoPath
            } else {
                Outcome::NotFound
            }
        }
    }
}

fn build_transport(config: &RuntimeConfig) -> SshTransport {
    SshTransport {
        on_controller: config.on_controller,
        controller: config
            .controller_ip
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string()),
        router_profile: config.ssh.clone(),
        controller_profile: config.ssh_controller.clone(),
    }
}
