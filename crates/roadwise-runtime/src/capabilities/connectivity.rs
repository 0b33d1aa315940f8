//! `check_connectivity` – network status from the snapshot, optionally with a
//! cached reachability probe of the reasoning endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use roadwise_kernel::Action;
use roadwise_sources::probe::{ProbeClient, ProbeResult};
use roadwise_types::{
    ALERT_TEXT_MAX_CHARS, AlertCandidate, AlertSeverity, CandidateAdvisory, ContextSnapshot,
    NetworkStatus, RoadwiseError, truncate_chars,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::{input_schema, parse_args};

const NAME: &str = "check_connectivity";

/// A cloud reply older than this is reported as stale.
const STALE_CLOUD_REPLY_S: f64 = 120.0;

/// Probe latency above which the endpoint is reported slow.
const SLOW_PROBE_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityMode {
    #[default]
    Status,
    Ping,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConnectivityParams {
    /// `status` reads telemetry only; `ping` also probes the cloud endpoint.
    #[serde(default)]
    pub action: ConnectivityMode,
}

pub fn type_quality(network_type: &str) -> &'static str {
    match network_type {
        "none" => "disconnected",
        "cell2G" => "very_slow",
        "cell3G" => "slow",
        "cell4G" | "wifi" => "good",
        "cell5G" | "ethernet" => "excellent",
        _ => "unknown",
    }
}

pub fn strength_quality(strength: &str) -> &'static str {
    match strength {
        "poor" => "poor",
        "moderate" => "moderate",
        "good" => "good",
        "great" => "excellent",
        _ => "unknown",
    }
}

/// Advisory for `net`, refined by a probe result when one was taken.
pub fn assess(net: &NetworkStatus, probe: Option<&ProbeResult>) -> CandidateAdvisory {
    let mut report = vec![
        format!("Network type: {}", net.network_type),
        format!("Signal strength: {}", net.strength),
        format!("Type quality: {}", type_quality(&net.network_type)),
        format!("Strength quality: {}", strength_quality(&net.strength)),
    ];
    if let Some(op) = net.operator.as_deref().filter(|o| !o.is_empty()) {
        report.push(format!("Carrier: {op}"));
    }
    if let Some(tech) = net.technology.as_deref().filter(|t| !t.is_empty()) {
        report.push(format!("Technology: {tech}"));
    }
    report.push(format!(
        "Metered connection: {}",
        if net.metered { "yes" } else { "no" }
    ));
    match net.last_cloud_ping_s_ago {
        Some(ago) if ago > STALE_CLOUD_REPLY_S => {
            report.push(format!("Last cloud reply: {ago:.0}s ago (stale)"))
        }
        Some(ago) => report.push(format!("Last cloud reply: {ago:.0}s ago")),
        None => report.push("Last cloud reply: unknown".to_string()),
    }

    let (mut severity, mut text) = if net.network_type == "none" {
        (AlertSeverity::Warning, "No network connection".to_string())
    } else if net.strength == "poor" || net.network_type == "cell2G" {
        (
            AlertSeverity::Warning,
            format!("Weak network: {} {}", net.network_type, net.strength),
        )
    } else {
        (
            AlertSeverity::Info,
            format!("Network: {} ({})", net.network_type, net.strength),
        )
    };

    if let Some(probe) = probe {
        report.push(format!(
            "Endpoint probe: {}, {}",
            if probe.reachable { "reachable" } else { "unreachable" },
            probe
                .latency_ms
                .map(|ms| format!("{ms}ms ({})", probe.quality()))
                .unwrap_or_else(|| "no latency".to_string())
        ));
        if !probe.reachable {
            severity = severity.max(AlertSeverity::Warning);
            text = "Cloud API unreachable".to_string();
        } else if let Some(ms) = probe.latency_ms.filter(|ms| *ms > SLOW_PROBE_MS) {
            text = format!("Cloud API slow ({ms}ms)");
        }
    }

    CandidateAdvisory::from_capability(NAME)
        .with_alert(AlertCandidate {
            text: truncate_chars(&text, ALERT_TEXT_MAX_CHARS),
            severity,
            confidence: 1.0,
        })
        .with_reason(report.join("\n"))
}

pub struct CheckConnectivity {
    probe: Arc<ProbeClient>,
}

impl CheckConnectivity {
    pub fn new(probe: Arc<ProbeClient>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Action for CheckConnectivity {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Report network type, signal strength, carrier and metered status; with \
         'ping', also check that the cloud reasoning endpoint is reachable and how fast."
    }

    fn input_schema(&self) -> Value {
        input_schema::<ConnectivityParams>()
    }

    async fn execute(
        &self,
        args: &Value,
        ctx: &ContextSnapshot,
    ) -> Result<CandidateAdvisory, RoadwiseError> {
        let p: ConnectivityParams = parse_args(NAME, args)?;
        let probe = match p.action {
            ConnectivityMode::Status => None,
            ConnectivityMode::Ping => self.probe.fetch(&()).await.into_payload(),
        };
        Ok(assess(&ctx.network, probe.as_ref()))
    }
}
