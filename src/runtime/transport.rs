use std::collections::BTreeMap;
use std::io::Read;
use std::net::IpAddr;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

/// A remote or local command as structured data. The transport renders it;
/// call sites never concatenate command lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Single-string rendering for execution through a remote shell.
    pub fn rendered(&self) -> String {
        if self.args.is_empty() {
            return self.program.clone();
        }
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SshMode {
    /// Batch, non-interactive invocation under the calling identity.
    Standard,
    /// Explicit identity and key; the remote account's forced command runs
    /// the probe.
    User,
}

/// Connection profile for one leg of the transport (routers or controller).
#[derive(Debug, Clone)]
pub struct SshProfile {
    pub mode: SshMode,
    pub user: Option<String>,
    pub key: Option<String>,
    pub options: BTreeMap<String, String>,
}

impl SshProfile {
    /// Batch defaults for reaching routers: short connect timeout, no host
    /// key enforcement.
    pub fn router_defaults() -> Self {
        let mut options = BTreeMap::new();
        options.insert("BatchMode".to_string(), "yes".to_string());
        options.insert("LogLevel".to_string(), "ERROR".to_string());
        options.insert("ConnectTimeout".to_string(), "5".to_string());
        options.insert("StrictHostKeyChecking".to_string(), "no".to_string());
        options.insert("UserKnownHostsFile".to_string(), "/dev/null".to_string());
        Self {
            mode: SshMode::Standard,
            user: None,
            key: None,
            options,
        }
    }

    /// Batch defaults for reaching the controller: longer timeout, strict
    /// host keys.
    pub fn controller_defaults() -> Self {
        let mut options = BTreeMap::new();
        options.insert("BatchMode".to_string(), "yes".to_string());
        options.insert("ConnectTimeout".to_string(), "10".to_string());
        options.insert("StrictHostKeyChecking".to_string(), "yes".to_string());
        options.insert(
            "UserKnownHostsFile".to_string(),
            "~/.ssh/known_hosts".to_string(),
        );
        Self {
            mode: SshMode::Standard,
            user: None,
            key: None,
            options,
        }
    }

    /// `-o key=value` pairs plus identity arguments when in user mode.
    fn cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (option, value) in &self.options {
            args.push("-o".to_string());
            args.push(format!("{option}={value}"));
        }
        if self.mode == SshMode::User {
            if let (Some(user), Some(key)) = (&self.user, &self.key) {
                args.push("-i".to_string());
                args.push(key.clone());
                args.push("-l".to_string());
                args.push(user.clone());
            }
        }
        args
    }
}

/// One blocking call against a target host. Implementations decide how the
/// command travels there (locally, one SSH leg, or nested through the
/// controller); tests substitute a scripted double.
pub trait Transport {
    fn run(&self, target: &str, command: &CommandSpec, timeout: Duration) -> Result<CommandOutput>;

    /// Whether `target` resolves to local execution rather than a remote leg.
    fn is_local(&self, _target: &str) -> bool {
        false
    }
}

/// SSH-based transport. On the controller, commands go straight to the
/// router (or run locally when the target is this host). Off the controller,
/// commands take a nested hop: an outer connection to the controller and an
/// inner connection to the router, each with its own profile.
#[derive(Debug, Clone)]
pub struct SshTransport {
    pub on_controller: bool,
    pub controller: String,
    pub router_profile: SshProfile,
    pub controller_profile: SshProfile,
}

impl SshTransport {
    fn ssh_invocation(&self, profile: &SshProfile, target: &str, remote: String) -> CommandSpec {
        let mut args = profile.cli_args();
        args.push(target.to_string());
        args.push(remote);
        CommandSpec {
            program: "ssh".to_string(),
            args,
        }
    }

    /// Inner leg of a nested invocation, rendered as a single remote command
    /// for the outer shell.
    fn nested_inner(&self, target: &str, command: &CommandSpec) -> String {
        let mut parts = vec!["ssh".to_string()];
        parts.extend(self.router_profile.cli_args());
        parts.push(target.to_string());
        parts.push(format!("'{}'", command.rendered()));
        parts.join(" ")
    }
}

impl Transport for SshTransport {
    fn is_local(&self, target: &str) -> bool {
        self.on_controller
            && (target == self.controller
                || target == "localhost"
                || target == "127.0.0.1"
                || target == "::1")
    }

    fn run(&self, target: &str, command: &CommandSpec, timeout: Duration) -> Result<CommandOutput> {
        let invocation = if self.is_local(target) {
            debug!(host = target, command = %command.rendered(), "running command locally");
            command.clone()
        } else if self.on_controller {
            self.ssh_invocation(&self.router_profile, target, command.rendered())
        } else if target == self.controller {
            self.ssh_invocation(&self.controller_profile, target, command.rendered())
        } else {
            let inner = self.nested_inner(target, command);
            self.ssh_invocation(&self.controller_profile, &self.controller, inner)
        };
        debug!(host = target, command = %invocation.rendered(), "dispatching transport command");
        run_local(&invocation, timeout)
    }
}

/// Run a command on this host with a wall-clock deadline. Output pipes are
/// drained on helper threads so a chatty child cannot stall on a full pipe.
pub fn run_local(command: &CommandSpec, timeout: Duration) -> Result<CommandOutput> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {}", command.program))?;

    let stdout_reader = spawn_drain(child.stdout.take());
    let stderr_reader = spawn_drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait().context("failed to poll child process")? {
            Some(status) => break status,
            None => {
                if Instant::now() >= deadline {
                    kill_child(&mut child, &command.program);
                    bail!(
                        "{} timed out after {:.0}s",
                        command.program,
                        timeout.as_secs_f64()
                    );
                }
                thread::sleep(Duration::from_millis(25));
            }
        }
    };

    let stdout = join_drain(stdout_reader);
    let stderr = join_drain(stderr_reader);
    Ok(CommandOutput {
        stdout,
        stderr,
        code: status.code(),
    })
}

fn spawn_drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buffer = String::new();
            let _ = reader.read_to_string(&mut buffer);
            buffer
        })
    })
}

fn join_drain(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn kill_child(child: &mut Child, program: &str) {
    if let Err(err) = child.kill() {
        warn!("failed to kill timed-out {program}: {err}");
    }
    let _ = child.wait();
}

/// Reverse host lookup through the local name service, consulting
/// `/etc/hosts` as well as DNS. Returns the first hostname, or `None` on any
/// failure.
pub fn local_reverse_lookup(addr: IpAddr, timeout: Duration) -> Option<String> {
    let command = CommandSpec::new("getent", ["hosts", &addr.to_string()]);
    let output = run_local(&command, timeout).ok()?;
    if !output.success() {
        return None;
    }
    let mut fields = output.stdout.split_whitespace();
    let _ip = fields.next()?;
    fields.next().map(ToString::to_string)
}

/// Forward host lookup through the local name service.
pub fn local_forward_lookup(hostname: &str, timeout: Duration) -> Option<String> {
    let command = CommandSpec::new("getent", ["hosts", hostname]);
    let output = run_local(&command, timeout).ok()?;
    if !output.success() {
        return None;
    }
    output
        .stdout
        .split_whitespace()
        .next()
        .map(ToString::to_string)
}

/// Extract the interface from `ip route get` output: the token following
/// `dev`.
pub fn extract_dev(route_output: &str) -> Option<String> {
    let mut tokens = route_output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "dev" {
            return tokens.next().map(ToString::to_string);
        }
    }
    None
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_spec_renders_program_and_args() {
        let spec = CommandSpec::new("mtr", ["--report", "--no-dns", "10.1.1.1"]);
        assert_eq!(spec.rendered(), "mtr --report --no-dns 10.1.1.1");

        let bare = CommandSpec::new("10.1.1.1", Vec::<String>::new());
        assert_eq!(bare.rendered(), "10.1.1.1");
    }

    #[test]
    fn profile_cli_args_include_options_and_identity() {
        let mut profile = SshProfile::router_defaults();
        let args = profile.cli_args();
        assert!(args.contains(&"-o".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(!args.contains(&"-i".to_string()));

        profile.mode = SshMode::User;
        profile.user = Some("probe".to_string());
        profile.key = Some("/etc/keys/probe".to_string());
        let args = profile.cli_args();
        assert!(args.windows(2).any(|w| w == ["-i", "/etc/keys/probe"]));
        assert!(args.windows(2).any(|w| w == ["-l", "probe"]));
    }

    fn transport(on_controller: bool) -> SshTransport {
        SshTransport {
            on_controller,
            controller: "10.100.0.5".to_string(),
            router_profile: SshProfile::router_defaults(),
            controller_profile: SshProfile::controller_defaults(),
        }
    }

    #[test]
    fn local_detection_only_on_controller() {
        let on = transport(true);
        assert!(on.is_local("10.100.0.5"));
        assert!(on.is_local("localhost"));
        assert!(on.is_local("127.0.0.1"));
        assert!(!on.is_local("10.1.1.1"));

        let off = transport(false);
        assert!(!off.is_local("10.100.0.5"));
        assert!(!off.is_local("localhost"));
    }

    #[test]
    fn nested_inner_quotes_remote_command() {
        let off = transport(false);
        let spec = CommandSpec::new("mtr", ["--report", "10.2.1.1"]);
        let inner = off.nested_inner("10.1.1.1", &spec);
        assert!(inner.starts_with("ssh "));
        assert!(inner.ends_with("10.1.1.1 'mtr --report 10.2.1.1'"));
    }

    #[test]
    fn run_local_captures_output() {
        let spec = CommandSpec::new("sh", ["-c", "echo out; echo err >&2"]);
        let output = run_local(&spec, Duration::from_secs(5)).expect("sh should run");
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn run_local_reports_failure_code() {
        let spec = CommandSpec::new("sh", ["-c", "exit 3"]);
        let output = run_local(&spec, Duration::from_secs(5)).expect("sh should run");
        assert!(!output.success());
        assert_eq!(output.code, Some(3));
    }

    #[test]
    fn run_local_enforces_deadline() {
        let spec = CommandSpec::new("sleep", ["5"]);
        let err = run_local(&spec, Duration::from_millis(100)).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn extract_dev_finds_interface_token() {
        assert_eq!(
            extract_dev("10.1.1.1 via 10.2.1.1 dev eth0 src 10.2.1.2"),
            Some("eth0".to_string())
        );
        assert_eq!(extract_dev("10.1.1.1 via 10.2.1.1"), None);
        assert_eq!(extract_dev(""), None);
    }
}
