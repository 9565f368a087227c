pub mod hop;
pub mod metadata;
pub mod route;

pub use hop::{DataSource, Hop, TracePath};
pub use metadata::{RouterKind, RouterLocation, RouterMetadata, RouterRole};
pub use route::{PolicyRule, Route, RouteDest, RouteKind, RouteProtocol, RouteScope};
