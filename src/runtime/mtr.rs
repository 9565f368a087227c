use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use crate::engine::fleet::Fleet;
use crate::runtime::transport::{
    local_forward_lookup, local_reverse_lookup, CommandSpec, Transport,
};

/// Wall-clock budget for one live-trace command.
pub const LIVE_TRACE_TIMEOUT: Duration = Duration::from_secs(60);
/// Budget for one name-service lookup while enriching hops.
const NAME_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// One normalized hop from the external hop-reporting tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeHop {
    pub hop: u32,
    pub address: String,
    pub hostname: Option<String>,
    pub rtt_ms: f64,
    pub loss_pct: f64,
}

/// Runs the external hop-reporting tool on a router (or the controller)
/// through the transport, parses its output, and filters hops down to known
/// Linux routers.
pub struct MtrRunner<'a> {
    transport: &'a dyn Transport,
    user_mode: bool,
    resolve_hostnames: bool,
    linux_routers: BTreeSet<String>,
    ip_lookup: BTreeMap<IpAddr, String>,
}

impl<'a> MtrRunner<'a> {
    pub fn new(transport: &'a dyn Transport, fleet: &Fleet, user_mode: bool) -> Self {
        let linux_routers = fleet
            .routers()
            .filter(|router| router.is_linux())
            .map(|router| router.name().to_string())
            .collect();
        Self {
            transport,
            user_mode,
            resolve_hostnames: true,
            linux_routers,
            ip_lookup: fleet.any_index().clone(),
        }
    }

    /// Disable name-service enrichment of parsed hops.
    pub fn resolve_hostnames(mut self, enabled: bool) -> Self {
        self.resolve_hostnames = enabled;
        self
    }

    /// Execute one trace from `source` toward `destination` and parse the
    /// hop list. User-mode targets run the remote account's forced probe
    /// command; everything else runs the report-mode tool invocation.
    pub fn execute(&self, source: &str, destination: IpAddr) -> Result<Vec<ProbeHop>> {
        let dst_text = destination.to_string();
        let user_mode = self.user_mode && !self.transport.is_local(source);
        let command = if user_mode {
            CommandSpec::new(dst_text.clone(), Vec::<String>::new())
        } else {
            CommandSpec::new(
                "mtr",
                [
                    "--report",
                    "--no-dns",
                    "-c",
                    "1",
                    "-m",
                    "30",
                    dst_text.as_str(),
                ],
            )
        };

        debug!(source, destination = %destination, user_mode, "starting live trace");
        let output = self
            .transport
            .run(source, &command, LIVE_TRACE_TIMEOUT)
            .with_context(|| format!("live trace from {source} to {destination} failed"))?;
        if !output.success() {
            debug!(stderr = %output.stderr.trim(), "live trace command failed");
            bail!(
                "live trace from {source} to {destination} exited with status {:?}",
                output.code
            );
        }

        if user_mode {
            self.parse_user_csv(&output.stdout)
        } else {
            self.parse_report(&output.stdout)
        }
    }

    /// Execute a trace and return both the full hop list and the subset that
    /// maps onto known Linux routers.
    pub fn execute_and_filter(
        &self,
        source: &str,
        destination: IpAddr,
    ) -> Result<(Vec<ProbeHop>, Vec<ProbeHop>)> {
        let all_hops = self.execute(source, destination)?;
        let linux_hops = self.filter_linux(&all_hops);
        if linux_hops.is_empty() {
            warn!("no Linux routers found in live trace");
        }
        Ok((all_hops, linux_hops))
    }

    /// Keep only hops that correspond to Linux routers of the fleet.
    pub fn filter_linux(&self, hops: &[ProbeHop]) -> Vec<ProbeHop> {
        hops.iter()
            .filter(|hop| self.is_linux_router(&hop.address, hop.hostname.as_deref()))
            .cloned()
            .collect()
    }

    /// Whether an address/hostname pair belongs to a Linux router: first by
    /// fleet index, then by case-insensitive short-hostname comparison
    /// against the known router names.
    pub fn is_linux_router(&self, address: &str, hostname: Option<&str>) -> bool {
        if let Ok(addr) = address.parse::<IpAddr>() {
            if let Some(router) = self.ip_lookup.get(&addr) {
                return self.linux_routers.contains(router);
            }
        }

        let hostname = match hostname {
            Some(name) => Some(name.to_string()),
            None => match address.parse::<IpAddr>() {
                Ok(addr) if self.resolve_hostnames => {
                    local_reverse_lookup(addr, NAME_LOOKUP_TIMEOUT)
                }
                Ok(_) => None,
                Err(_) => Some(address.to_string()),
            },
        };
        let Some(hostname) = hostname else {
            return false;
        };

        let short = short_name(&hostname);
        self.linux_routers
            .iter()
            .any(|router| short_name(router) == short)
    }

    /// Parse the tool's report output: `N.|-- addr loss% sent last ...`
    /// rows following the `HOST: ... Loss%` header.
    fn parse_report(&self, output: &str) -> Result<Vec<ProbeHop>> {
        let mut hops = Vec::new();
        let mut in_data = false;

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.contains("HOST:") && line.contains("Loss%") {
                in_data = true;
                continue;
            }
            if !in_data || !line.contains("|--") {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(index), Some(target), Some(loss), Some(_sent), Some(last)) = (
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
            ) else {
                continue;
            };
            let Some(hop) = index
                .strip_suffix(".|--")
                .and_then(|number| number.parse::<u32>().ok())
            else {
                continue;
            };
            let Some(loss_pct) = loss
                .strip_suffix('%')
                .and_then(|number| number.parse::<f64>().ok())
            else {
                continue;
            };
            let Ok(rtt_ms) = last.parse::<f64>() else {
                continue;
            };

            let (address, hostname) = self.identify(target);
            hops.push(ProbeHop {
                hop,
                address,
                hostname,
                rtt_ms,
                loss_pct,
            });
        }

        if hops.is_empty() {
            bail!("no valid live trace data found in output");
        }
        Ok(hops)
    }

    /// Parse user-mode CSV output: `hop,address,rtt_ms,status` lines, one
    /// `#` comment line allowed; status 0 means success.
    fn parse_user_csv(&self, output: &str) -> Result<Vec<ProbeHop>> {
        let mut hops = Vec::new();

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 4 {
                debug!("skipping malformed probe line: {line}");
                continue;
            }
            let (Ok(hop), Ok(rtt_ms), Ok(status)) = (
                fields[0].trim().parse::<u32>(),
                fields[2].trim().parse::<f64>(),
                fields[3].trim().parse::<i32>(),
            ) else {
                warn!("failed to parse probe line: {line}");
                continue;
            };
            let Ok(addr) = fields[1].trim().parse::<IpAddr>() else {
                warn!("invalid address in probe line: {line}");
                continue;
            };

            let hostname = if self.resolve_hostnames {
                local_reverse_lookup(addr, NAME_LOOKUP_TIMEOUT)
            } else {
                None
            };
            hops.push(ProbeHop {
                hop,
                address: addr.to_string(),
                hostname,
                rtt_ms,
                loss_pct: if status == 0 { 0.0 } else { 100.0 },
            });
        }

        if hops.is_empty() {
            bail!("no valid hop data found in user mode output");
        }
        Ok(hops)
    }

    /// Split a report-mode target into address and hostname, resolving
    /// through the name service where needed.
    fn identify(&self, target: &str) -> (String, Option<String>) {
        match target.parse::<IpAddr>() {
            Ok(addr) => {
                let hostname = if self.resolve_hostnames {
                    local_reverse_lookup(addr, NAME_LOOKUP_TIMEOUT)
                } else {
                    None
                };
                (addr.to_string(), hostname)
            }
            Err(_) => {
                let address = if self.resolve_hostnames {
                    local_forward_lookup(target, NAME_LOOKUP_TIMEOUT)
                        .unwrap_or_else(|| target.to_string())
                } else {
                    target.to_string()
                };
                (address, Some(target.to_string()))
            }
        }
    }
}

fn short_name(name: &str) -> String {
    name.split('.').next().unwrap_or("").to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::router::Router;
    use crate::model::{Route, RouterMetadata};
    use crate::runtime::transport::test_support::ScriptedTransport;
    use serde_json::json;

    const REPORT: &str = "\
Start: 2024-05-01T10:00:00+0000
HOST: gw-a                        Loss%   Snt   Last   Avg  Best  Wrst StDev
  1.|-- 10.1.1.1                   0.0%     1    1.2   1.2   1.2   1.2   0.0
  2.|-- 10.100.0.2                 0.0%     1    5.4   5.4   5.4   5.4   0.0
  3.|-- 198.51.100.7              25.0%     1   12.9  12.9  12.9  12.9   0.0
";

    fn fixture_fleet() -> Fleet {
        let r1 = Router::new(
            "r1",
            vec![Route::from_value(&json!({
                "dst": "10.1.1.0/24", "dev": "eth0", "prefsrc": "10.1.1.1",
                "protocol": "kernel", "scope": "link"
            }))
            .unwrap()],
            Vec::new(),
            RouterMetadata::default(),
            [("eth0".to_string(), vec!["10.1.1.1".parse().unwrap()])].into(),
        );
        let legacy = Router::new(
            "legacy",
            vec![Route::from_value(&json!({
                "dst": "10.100.0.0/24", "dev": "eth0", "prefsrc": "10.100.0.2",
                "protocol": "kernel", "scope": "link"
            }))
            .unwrap()],
            Vec::new(),
            RouterMetadata {
                linux: false,
                ..RouterMetadata::default()
            },
            [("eth0".to_string(), vec!["10.100.0.2".parse().unwrap()])].into(),
        );
        Fleet::from_routers(vec![r1, legacy]).unwrap()
    }

    #[test]
    fn parses_report_output() {
        let transport = ScriptedTransport::new(vec![ScriptedTransport::ok(REPORT)]);
        let fleet = fixture_fleet();
        let runner = MtrRunner::new(&transport, &fleet, false).resolve_hostnames(false);

        let hops = runner.execute("r1", "198.51.100.7".parse().unwrap()).unwrap();
        assert_eq!(hops.len(), 3);
        assert_eq!(hops[0].hop, 1);
        assert_eq!(hops[0].address, "10.1.1.1");
        assert_eq!(hops[0].rtt_ms, 1.2);
        assert_eq!(hops[2].loss_pct, 25.0);

        let calls = transport.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "r1");
        assert_eq!(
            calls[0].1,
            "mtr --report --no-dns -c 1 -m 30 198.51.100.7"
        );
    }

    #[test]
    fn parses_user_mode_csv() {
        let csv = "\
# hop,address,rtt_ms,status
1,10.1.1.1,0.8,0
2,10.100.0.2,4.1,0
bogus line
3,not-an-ip,1.0,0
4,198.51.100.7,9.9,1
";
        let transport = ScriptedTransport::new(vec![ScriptedTransport::ok(csv)]);
        let fleet = fixture_fleet();
        let runner = MtrRunner::new(&transport, &fleet, true).resolve_hostnames(false);

        let hops = runner.execute("r1", "198.51.100.7".parse().unwrap()).unwrap();
        assert_eq!(hops.len(), 3);
        assert_eq!(hops[1].loss_pct, 0.0);
        assert_eq!(hops[2].loss_pct, 100.0);

        let calls = transport.calls.borrow();
        assert_eq!(calls[0].1, "198.51.100.7");
    }

    #[test]
    fn user_mode_falls_back_to_report_for_local_targets() {
        let transport = ScriptedTransport::new(vec![ScriptedTransport::ok(REPORT)])
            .with_local_target("127.0.0.1");
        let fleet = fixture_fleet();
        let runner = MtrRunner::new(&transport, &fleet, true).resolve_hostnames(false);

        runner
            .execute("127.0.0.1", "198.51.100.7".parse().unwrap())
            .unwrap();
        let calls = transport.calls.borrow();
        assert!(calls[0].1.starts_with("mtr --report"));
    }

    #[test]
    fn nonzero_exit_fails_the_call() {
        let transport = ScriptedTransport::new(vec![Ok(
            crate::runtime::transport::CommandOutput {
                stdout: String::new(),
                stderr: "connection refused".to_string(),
                code: Some(255),
            },
        )]);
        let fleet = fixture_fleet();
        let runner = MtrRunner::new(&transport, &fleet, false).resolve_hostnames(false);
        assert!(runner.execute("r1", "198.51.100.7".parse().unwrap()).is_err());
    }

    #[test]
    fn empty_report_is_an_error() {
        let transport = ScriptedTransport::new(vec![ScriptedTransport::ok("HOST: x Loss%\n")]);
        let fleet = fixture_fleet();
        let runner = MtrRunner::new(&transport, &fleet, false).resolve_hostnames(false);
        assert!(runner.execute("r1", "198.51.100.7".parse().unwrap()).is_err());
    }

    #[test]
    fn linux_filter_uses_index_then_hostnames() {
        let transport = ScriptedTransport::new(Vec::new());
        let fleet = fixture_fleet();
        let runner = MtrRunner::new(&transport, &fleet, false).resolve_hostnames(false);

        // Indexed addresses answer from metadata.
        assert!(runner.is_linux_router("10.1.1.1", None));
        assert!(!runner.is_linux_router("10.100.0.2", None));
        // Unindexed addresses fall back to short-hostname matching.
        assert!(runner.is_linux_router("203.0.113.9", Some("R1.example.net")));
        assert!(!runner.is_linux_router("203.0.113.9", Some("border.example.net")));
        assert!(!runner.is_linux_router("203.0.113.9", None));

        let hops = vec![
            ProbeHop {
                hop: 1,
                address: "10.1.1.1".to_string(),
                hostname: None,
                rtt_ms: 1.0,
                loss_pct: 0.0,
            },
            ProbeHop {
                hop: 2,
                address: "10.100.0.2".to_string(),
                hostname: None,
                rtt_ms: 2.0,
                loss_pct: 0.0,
            },
        ];
        let filtered = runner.filter_linux(&hops);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].address, "10.1.1.1");
    }
}
