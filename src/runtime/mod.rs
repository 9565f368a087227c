pub mod config;
pub mod mtr;
pub mod transport;

pub use config::{load_runtime_config, ConfigOverrides, RuntimeConfig};
pub use mtr::{MtrRunner, ProbeHop};
pub use transport::{CommandOutput, CommandSpec, SshMode, SshProfile, SshTransport, Transport};
