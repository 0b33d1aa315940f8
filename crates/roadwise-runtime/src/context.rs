//! Inbound context and its rendering for the reasoning engine.
//!
//! [`ContextSource`] is the seam to the vehicle: anything that can produce a
//! [`ContextSnapshot`] on demand.  [`describe_context`] turns a snapshot into
//! the text block the engine reads next to the camera frame, and
//! [`build_system_prompt`] assembles the base instructions plus every
//! registered knowledge fragment.

use std::fmt::Write as _;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use roadwise_kernel::CapabilityRegistry;
use roadwise_types::{ContextSnapshot, MPH_TO_MS, RoadwiseError};

/// Supplies one snapshot per tick.
///
/// The publish loop awaits this on every tick, so implementations must not
/// block the worker thread: file or socket reads go through `tokio` I/O.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn snapshot(&self) -> Result<ContextSnapshot, RoadwiseError>;
}

pub const MS_TO_MPH: f32 = 1.0 / MPH_TO_MS;

/// Base instructions given to the engine on every cycle.
pub const SYSTEM_PROMPT_BASE: &str = "\
You are a driving co-pilot watching the road through a forward camera. \
You never drive the car. You may only suggest a target speed, suggest a lane \
change, or show a short alert, by calling the tools you are given.

Rules:
- Call a tool only when the scene or the data gives a concrete reason.
- Prefer doing nothing over a weak suggestion. Use confidence honestly.
- Speeds are in mph. Never suggest a speed above the posted limit.
- Alerts must fit in 50 characters.
- After any tool calls, describe the scene in one short sentence.";

/// Base64 of the snapshot's camera frame, if one is attached.
pub fn encode_frame(ctx: &ContextSnapshot) -> Option<String> {
    ctx.frame
        .as_ref()
        .filter(|f| !f.jpeg.is_empty())
        .map(|f| STANDARD.encode(&f.jpeg))
}

/// Base prompt followed by the registry's knowledge under a
/// `# Domain Knowledge` heading.
pub fn build_system_prompt(registry: &CapabilityRegistry) -> String {
    let knowledge = registry.knowledge_text();
    if knowledge.is_empty() {
        return SYSTEM_PROMPT_BASE.to_string();
    }
    format!("{SYSTEM_PROMPT_BASE}\n\n# Domain Knowledge\n\n{knowledge}")
}

fn mph(ms: f32) -> f32 {
    ms * MS_TO_MPH
}

/// Render `ctx` as plain text.  Speeds are shown in mph.
pub fn describe_context(ctx: &ContextSnapshot) -> String {
    let v = &ctx.vehicle;
    let mut out = String::new();

    let cruise = if v.cruise_enabled && v.cruise_set_ms > 0.0 {
        format!("{:.0} mph", mph(v.cruise_set_ms))
    } else {
        "off".to_string()
    };
    let _ = writeln!(
        out,
        "Vehicle: {:.0} mph, accel {:.1} m/s², cruise {cruise}, steering {:.0}°{}",
        mph(v.speed_ms),
        v.accel_ms2,
        v.steering_deg,
        if v.standstill { ", stopped" } else { "" },
    );

    let flags: Vec<&str> = [
        (v.brake_pressed, "brake"),
        (v.gas_pressed, "gas"),
        (v.left_blinker, "left blinker"),
        (v.right_blinker, "right blinker"),
    ]
    .iter()
    .filter(|(on, _)| *on)
    .map(|(_, name)| *name)
    .collect();
    if !flags.is_empty() {
        let _ = writeln!(out, "Driver inputs: {}", flags.join(", "));
    }

    if ctx.leads.is_empty() {
        out.push_str("No vehicles detected ahead by radar.\n");
    } else {
        for lead in &ctx.leads {
            let _ = writeln!(
                out,
                "Lead vehicle: {:.0} m ahead, {:.0} mph ({:+.0} mph relative)",
                lead.distance_m,
                mph(lead.speed_ms),
                mph(lead.relative_speed_ms),
            );
        }
    }

    if let Some(road) = ctx.map.road_name.as_deref().filter(|r| !r.is_empty()) {
        let _ = writeln!(out, "Road: {road}");
    }
    if let Some(limit) = ctx.map.speed_limit_ms {
        let _ = writeln!(out, "Speed limit: {:.0} mph", mph(limit));
    }
    if let Some(ahead) = ctx.map.speed_limit_ahead_ms {
        let distance = ctx.map.speed_limit_ahead_distance_m.unwrap_or(0.0);
        let _ = writeln!(
            out,
            "Speed limit ahead: {:.0} mph in {distance:.0} m",
            mph(ahead)
        );
    }

    match &ctx.gps {
        Some(fix) => {
            let _ = writeln!(
                out,
                "GPS: {:.5}, {:.5} (±{:.0} m), bearing {:.0}°",
                fix.lat, fix.lon, fix.accuracy_m, fix.bearing_deg
            );
        }
        None => out.push_str("GPS: no fix\n"),
    }

    let _ = writeln!(
        out,
        "Co-pilot: {}",
        match (ctx.system.enabled, ctx.system.active) {
            (true, true) => "engaged",
            (true, false) => "enabled, not engaged",
            _ => "disabled",
        }
    );

    let n = &ctx.network;
    let _ = write!(out, "Network: {} ({})", n.network_type, n.strength);
    if n.metered {
        out.push_str(", metered");
    }
    if let Some(ago) = n.last_cloud_ping_s_ago {
        let _ = write!(out, ", last cloud reply {ago:.0}s ago");
    }
    out.push('\n');

    out.push_str("\nDecide whether any tool call is warranted for the scene above.");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadwise_kernel::{Capability, Knowledge};
    use roadwise_types::{Frame, GpsFix, LeadVehicle};
    use std::sync::Arc;

    fn ms(mph: f32) -> f32 {
        mph * MPH_TO_MS
    }

    #[test]
    fn renders_speeds_in_mph() {
        let mut ctx = ContextSnapshot::default();
        ctx.vehicle.speed_ms = ms(65.0);
        ctx.vehicle.cruise_enabled = true;
        ctx.vehicle.cruise_set_ms = ms(70.0);
        ctx.map.speed_limit_ms = Some(ms(70.0));
        ctx.leads.push(LeadVehicle {
            distance_m: 42.0,
            speed_ms: ms(45.0),
            relative_speed_ms: ms(-20.0),
        });
        let text = describe_context(&ctx);
        assert!(text.contains("Vehicle: 65 mph"), "{text}");
        assert!(text.contains("cruise 70 mph"));
        assert!(text.contains("Speed limit: 70 mph"));
        assert!(text.contains("42 m ahead, 45 mph (-20 mph relative)"));
    }

    #[test]
    fn renders_absent_data_explicitly() {
        let text = describe_context(&ContextSnapshot::default());
        assert!(text.contains("No vehicles detected ahead by radar."));
        assert!(text.contains("GPS: no fix"));
        assert!(text.contains("cruise off"));
        assert!(!text.contains("Driver inputs"));
        assert!(text.contains("Network: none (unknown)"));
    }

    #[test]
    fn renders_driver_flags_and_fix() {
        let mut ctx = ContextSnapshot::default();
        ctx.vehicle.brake_pressed = true;
        ctx.vehicle.left_blinker = true;
        ctx.gps = Some(GpsFix {
            lat: 27.95,
            lon: -82.46,
            accuracy_m: 4.0,
            bearing_deg: 90.0,
        });
        let text = describe_context(&ctx);
        assert!(text.contains("Driver inputs: brake, left blinker"));
        assert!(text.contains("GPS: 27.95000, -82.46000"));
    }

    #[test]
    fn frame_is_base64() {
        let mut ctx = ContextSnapshot::default();
        assert_eq!(encode_frame(&ctx), None);
        ctx.frame = Some(Frame {
            jpeg: vec![0xFF, 0xD8, 0xFF],
        });
        assert_eq!(encode_frame(&ctx).as_deref(), Some("/9j/"));
    }

    struct Tip;
    impl Knowledge for Tip {
        fn name(&self) -> &str {
            "tip"
        }
        fn description(&self) -> &str {
            "a tip"
        }
        fn fragment(&self) -> &str {
            "Slow down in fog."
        }
    }

    #[test]
    fn system_prompt_appends_knowledge() {
        let bare = CapabilityRegistry::new();
        assert_eq!(build_system_prompt(&bare), SYSTEM_PROMPT_BASE);

        let mut registry = CapabilityRegistry::new();
        registry.register(Capability::Knowledge(Arc::new(Tip))).unwrap();
        let prompt = build_system_prompt(&registry);
        assert!(prompt.starts_with(SYSTEM_PROMPT_BASE));
        assert!(prompt.contains("# Domain Knowledge\n\n## Skill: tip\nSlow down in fog."));
    }
}
