pub mod fleet;
pub mod forward;
pub mod reverse;
pub mod router;

pub use fleet::{is_public, Fleet};
pub use forward::{ForwardSimulator, Simulation, WalkEnd, MAX_HOPS};
pub use reverse::{ReverseTracer, RouterProbe, TransportProbe};
pub use router::Router;
