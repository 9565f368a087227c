use serde::{Deserialize, Serialize};

use crate::error::Outcome;
use crate::model::{Hop, TracePath};

/// Canonical structured output: a single mapping with the ordered hop
/// sequence. Field order of [`Hop`] is the wire layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDocument {
    pub traceroute_path: Vec<Hop>,
}

/// Structured output for failed requests, kept parseable for downstream
/// tooling: `success` is false and the path is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDocument {
    pub success: bool,
    pub error_code: String,
    pub message: String,
    pub traceroute_path: Vec<Hop>,
}

pub fn to_document(path: &TracePath) -> TraceDocument {
    TraceDocument {
        traceroute_path: path.hops.clone(),
    }
}

pub fn format_json(path: &TracePath) -> String {
    serde_json::to_string_pretty(&to_document(path))
        .unwrap_or_else(|_| "{\"traceroute_path\":[]}".to_string())
}

pub fn parse_document(text: &str) -> Result<TraceDocument, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn failure_json(outcome: Outcome, message: &str) -> String {
    let document = FailureDocument {
        success: false,
        error_code: outcome.code().to_string(),
        message: message.to_string(),
        traceroute_path: Vec::new(),
    };
    serde_json::to_string_pretty(&document)
        .unwrap_or_else(|_| "{\"success\":false,\"traceroute_path\":[]}".to_string())
}

pub fn format_text(path: &TracePath) -> Vec<String> {
    path.hops.iter().map(format_hop_line).collect()
}

fn format_hop_line(hop: &Hop) -> String {
    if hop.is_marker() {
        return format!(" {:2}  {}", hop.seq, hop.address);
    }
    if hop.is_shortcut() {
        return format!(
            " {:2}  {} ({}) {}",
            hop.seq, hop.name, hop.address, hop.incoming
        );
    }

    // Timing is rendered only for measured, positive round-trip times.
    let timing = match hop.rtt {
        Some(rtt) if rtt > 0.0 => format!(" {rtt:.1}ms"),
        _ => String::new(),
    };

    if hop.is_pseudo() {
        let iface = if hop.incoming.is_empty() {
            String::new()
        } else {
            let connector = if hop.is_router_owned { "on" } else { "via" };
            format!(" {connector} {}", hop.incoming)
        };
        let router = if hop.connected_router.is_empty() {
            String::new()
        } else {
            format!(" on {}", hop.connected_router)
        };
        return format!(
            " {:2}  {} ({}){}{}{}",
            hop.seq, hop.name, hop.address, iface, router, timing
        );
    }

    let iface = if !hop.incoming.is_empty() && !hop.outgoing_interface.is_empty() {
        format!(" from {} to {}", hop.incoming, hop.outgoing_interface)
    } else if !hop.incoming.is_empty() {
        let connector = if hop.is_router_owned { "on" } else { "via" };
        format!(" {connector} {}", hop.incoming)
    } else {
        String::new()
    };
    format!(
        " {:2}  {} ({}){}{}",
        hop.seq, hop.name, hop.address, iface, timing
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::hop::{
        DESTINATION_NAME, NO_ROUTE_ADDRESS, SOURCE_NAME, UNREACHABLE_MARKER,
    };
    use crate::model::DataSource;

    fn same_segment_path() -> TracePath {
        let mut path = TracePath::new();
        let mut source = Hop::new(1, SOURCE_NAME, "10.1.1.10");
        source.incoming = "eth0".to_string();
        source.connected_router = "r1".to_string();
        path.push(source);
        let mut router = Hop::new(2, "r1", "10.1.1.1");
        router.incoming = "eth0".to_string();
        router.outgoing_interface = "eth0".to_string();
        router.is_router_owned = true;
        path.push(router);
        let mut destination = Hop::new(3, DESTINATION_NAME, "10.1.1.20");
        destination.incoming = "eth0".to_string();
        destination.connected_router = "r1".to_string();
        path.push(destination);
        path
    }

    #[test]
    fn text_lines_for_pseudo_and_router_hops() {
        let lines = format_text(&same_segment_path());
        assert_eq!(lines[0], "  1  source (10.1.1.10) via eth0 on r1");
        assert_eq!(lines[1], "  2  r1 (10.1.1.1) from eth0 to eth0");
        assert_eq!(lines[2], "  3  destination (10.1.1.20) via eth0 on r1");
    }

    #[test]
    fn text_line_for_marker_and_shortcut() {
        let mut path = TracePath::new();
        path.push(Hop::new(1, UNREACHABLE_MARKER, NO_ROUTE_ADDRESS));
        let mut shortcut = Hop::new(2, "r1 -> r1", "10.1.1.1 -> 10.1.1.2");
        shortcut.incoming = "eth0 -> eth0".to_string();
        path.push(shortcut);

        let lines = format_text(&path);
        assert_eq!(lines[0], "  1  No route");
        assert_eq!(lines[1], "  2  r1 -> r1 (10.1.1.1 -> 10.1.1.2) eth0 -> eth0");
    }

    #[test]
    fn owned_single_interface_uses_on() {
        let mut path = TracePath::new();
        let mut hop = Hop::new(1, "r1", "10.1.1.1");
        hop.incoming = "eth0".to_string();
        hop.is_router_owned = true;
        path.push(hop);
        assert_eq!(format_text(&path)[0], "  1  r1 (10.1.1.1) on eth0");
    }

    #[test]
    fn zero_rtt_is_hidden_and_positive_rtt_rendered() {
        let mut path = TracePath::new();
        let mut silent = Hop::new(1, "r1", "10.1.1.1");
        silent.rtt = Some(0.0);
        silent.data_source = DataSource::Mtr;
        path.push(silent);
        let mut timed = Hop::new(2, "r2", "10.2.1.1");
        timed.rtt = Some(12.34);
        timed.data_source = DataSource::Mtr;
        path.push(timed);

        let lines = format_text(&path);
        assert_eq!(lines[0], "  1  r1 (10.1.1.1)");
        assert_eq!(lines[1], "  2  r2 (10.2.1.1) 12.3ms");
    }

    #[test]
    fn wide_sequence_numbers_keep_alignment() {
        let mut path = TracePath::new();
        path.push(Hop::new(12, "r1", "10.1.1.1"));
        assert_eq!(format_text(&path)[0], " 12  r1 (10.1.1.1)");
    }

    #[test]
    fn json_round_trip_is_byte_equal() {
        let mut path = same_segment_path();
        path.last_mut().unwrap().rtt = Some(3.5);
        path.last_mut().unwrap().data_source = DataSource::Mtr;

        let rendered = format_json(&path);
        let reparsed = parse_document(&rendered).unwrap();
        let rerendered = serde_json::to_string_pretty(&reparsed).unwrap();
        assert_eq!(rendered, rerendered);
        assert_eq!(reparsed.traceroute_path, path.hops);
    }

    #[test]
    fn hop_wire_schema_is_stable() {
        let mut hop = Hop::new(1, "r1", "10.1.1.1");
        hop.incoming = "eth0".to_string();
        hop.is_router_owned = true;
        hop.rtt = Some(1.5);
        hop.data_source = DataSource::Mtr;

        let rendered = serde_json::to_string_pretty(&hop).unwrap();
        let expected = "\
{
  \"hop\": 1,
  \"router_name\": \"r1\",
  \"ip_address\": \"10.1.1.1\",
  \"interface\": \"eth0\",
  \"is_router_owned\": true,
  \"connected_router\": \"\",
  \"prev_hop\": \"\",
  \"next_hop\": \"\",
  \"outgoing_interface\": \"\",
  \"data_source\": \"mtr\",
  \"rtt\": 1.5
}";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn simulated_hops_omit_rtt_in_json() {
        let hop = Hop::new(1, "r1", "10.1.1.1");
        let rendered = serde_json::to_string(&hop).unwrap();
        assert!(!rendered.contains("\"rtt\""));
        assert!(rendered.contains("\"data_source\":\"simulated\""));
    }

    #[test]
    fn failure_document_shape() {
        let rendered = failure_json(Outcome::NoPath, "no path between endpoints");
        let parsed: FailureDocument = serde_json::from_str(&rendered).unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.error_code, "no_path");
        assert!(parsed.traceroute_path.is_empty());
    }
}
