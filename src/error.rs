use std::net::IpAddr;

use thiserror::Error;

/// Caller-visible result classification for a trace request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    NoPath,
    NotFound,
    NoLinuxRouters,
    InvalidInput,
    Configuration,
    Internal,
}

impl Outcome {
    /// Process exit code for standalone invocation.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::NoPath => 1,
            Self::NotFound => 2,
            Self::NoLinuxRouters => 4,
            Self::InvalidInput | Self::Configuration | Self::Internal => 10,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NoPath => "no_path",
            Self::NotFound => "not_found",
            Self::NoLinuxRouters => "no_linux_routers",
            Self::InvalidInput => "invalid_input",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

/// Short user-directed description of an outcome.
pub fn outcome_message(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Ok => "path found",
        Outcome::NoPath => "source and destination found, but no path connects them",
        Outcome::NotFound => "source not found in the router network, or destination not reachable",
        Outcome::NoLinuxRouters => "live trace completed but found no Linux routers in the path",
        Outcome::InvalidInput => "invalid input",
        Outcome::Configuration => "configuration problem",
        Outcome::Internal => "unexpected internal error",
    }
}

/// Suggested next actions for an outcome.
pub fn outcome_suggestions(outcome: Outcome) -> &'static [&'static str] {
    match outcome {
        Outcome::Ok => &[],
        Outcome::NoPath => &[
            "Check routing tables on the routers along the expected path",
            "Verify that no blackhole or missing route interrupts the path",
        ],
        Outcome::NotFound => &[
            "Verify the address belongs to a router interface or a connected network",
            "Check that the facts directory covers the routers involved",
        ],
        Outcome::NoLinuxRouters => &[
            "Verify the router inventory lists the Linux hops on this path",
            "Check that router metadata marks the expected hops as linux",
        ],
        Outcome::InvalidInput => &["Provide valid IPv4 or IPv6 addresses"],
        Outcome::Configuration => &[
            "Check the configuration file and the facts directory location",
            "Set controller_ip (or mark a router as ansible_controller) for reverse tracing",
        ],
        Outcome::Internal => &["Re-run with -vv to capture diagnostic details"],
    }
}

/// Every expected failure of a trace request, plus a catch-all for
/// programming defects. Each variant maps onto exactly one [`Outcome`].
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("source {0} is not configured on any router and not on any directly connected network")]
    SourceNotFound(IpAddr),

    #[error("no route between {src} and {dst}")]
    NoRoute { src: IpAddr, dst: IpAddr },

    #[error("destination {0} not reachable via live trace")]
    DestinationUnreachable(IpAddr),

    #[error("live trace found no Linux routers in the path")]
    NoLinuxRouters,

    #[error("no controller address configured for reverse path tracing")]
    MissingController,

    #[error("facts directory unusable: {0}")]
    FactsDirectory(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl TraceError {
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::InvalidAddress(_) => Outcome::InvalidInput,
            Self::SourceNotFound(_) => Outcome::NotFound,
            Self::NoRoute { .. } => Outcome::NoPath,
            Self::DestinationUnreachable(_) => Outcome::NotFound,
            Self::NoLinuxRouters => Outcome::NoLinuxRouters,
            Self::MissingController => Outcome::Configuration,
            Self::FactsDirectory(_) => Outcome::Configuration,
            Self::Internal(_) => Outcome::Internal,
        }
    }
}
