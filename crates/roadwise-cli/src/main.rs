//! `roadwise` – Roadwise Command Line Interface
//!
//! Runs the advisory pipeline against a file-backed vehicle context:
//!
//! 1. Loads `~/.roadwise/config.toml` (writing defaults on first run) and
//!    applies `ROADWISE_*` overrides.
//! 2. Builds the reasoning backend chain, the observation store and the
//!    capability registry.
//! 3. Runs the publish loop, printing each changed advisory and status.
//! 4. Intercepts **Ctrl-C** to stop the loop and clear the advisory.

mod config;
mod context_file;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use roadwise_kernel::{CapabilityRegistry, SafetyFilter};
use roadwise_memory::{DedupEngine, ObservationLog, ObservationStore};
use roadwise_runtime::reasoning::ANTHROPIC_MODEL;
use roadwise_runtime::{
    AdvisoryChannel, AdvisoryLoop, AgentState, AgentStatus, AnthropicReasoner, FallbackReasoner,
    OpenAiCompatReasoner, Orchestrator, PublishedAdvisory, ReasoningEngine, SourceHub,
    StatusChannel, register_defaults,
};
use roadwise_types::{AlertSeverity, MPH_TO_MS, RoadwiseError};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{Config, Provider};
use crate::context_file::FileContextSource;

fn main() -> ExitCode {
    let _telemetry = roadwise_runtime::init_tracing("roadwise");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => first_run(),
        Err(e) => {
            println!("  {}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    if let Err(e) = cfg.validate() {
        println!("  {}: {}", "Invalid configuration".red().bold(), e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            println!("  {}: {}", "Failed to start runtime".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => {
            println!("{}", "  ✓ Exiting Roadwise.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("  {}: {}", "Fatal".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Write a default config so the user has something to edit.
fn first_run() -> Config {
    let mut cfg = Config::default();
    match config::save(&cfg) {
        Ok(()) => println!(
            "  {} Default config written to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("  {}: {}", "Error saving config".red(), e),
    }
    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

fn build_engine(cfg: &Config) -> FallbackReasoner {
    let model = |fallback: &str| {
        if cfg.model.trim().is_empty() {
            fallback.to_string()
        } else {
            cfg.model.clone()
        }
    };
    let ollama = || -> Arc<dyn ReasoningEngine> {
        Arc::new(OpenAiCompatReasoner::new(
            cfg.ollama_url.clone(),
            cfg.ollama_model.clone(),
            None,
        ))
    };

    let mut engines: Vec<Arc<dyn ReasoningEngine>> = Vec::new();
    match cfg.provider {
        Provider::Anthropic => engines.push(Arc::new(
            AnthropicReasoner::new(cfg.anthropic_api_key.expose())
                .with_url(cfg.anthropic_url.clone())
                .with_model(model(ANTHROPIC_MODEL)),
        )),
        Provider::OpenAI => engines.push(Arc::new(OpenAiCompatReasoner::new(
            cfg.openai_url.clone(),
            model("gpt-4o"),
            cfg.openai_api_key.expose(),
        ))),
        Provider::Ollama => engines.push(ollama()),
    }
    if cfg.ollama_fallback && cfg.provider != Provider::Ollama {
        engines.push(ollama());
    }
    FallbackReasoner::new(engines)
}

fn build_store(cfg: &Config) -> ObservationStore {
    let path = cfg.observation_db_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let log = match ObservationLog::open(&path) {
        Ok(log) => {
            info!(path = %path.display(), "observation log opened");
            Some(log)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "observation log unavailable; recording in memory only");
            None
        }
    };
    ObservationStore::new(
        DedupEngine::new(cfg.dedup_thresholds(), cfg.ring_capacity),
        log,
    )
}

async fn run(cfg: Config) -> Result<(), RoadwiseError> {
    let engine = build_engine(&cfg);
    if engine.is_available() {
        println!("  Reasoning backend: {}", engine.name().bold());
    } else {
        println!(
            "  {}  Set an API key or choose the ollama provider.",
            "No reasoning backend is configured.".yellow()
        );
    }

    let hub = SourceHub::public(cfg.fl511_api_key.expose(), cfg.probe_url());
    let mut registry = CapabilityRegistry::new();
    register_defaults(&mut registry, &hub, Arc::new(build_store(&cfg)))?;
    let registry = registry.freeze();
    println!("  {} capabilities registered", registry.len());

    let advisories = Arc::new(AdvisoryChannel::new());
    let status = Arc::new(StatusChannel::new());
    let orchestrator = Orchestrator::new(registry, Arc::new(engine), cfg.orchestrator_config()?)
        .with_status(status.clone());
    let source = Arc::new(FileContextSource::new(
        cfg.context_path.clone(),
        cfg.frame_path.clone(),
    ));
    println!(
        "  Reading context from {}",
        cfg.context_path.display().to_string().dimmed()
    );

    let agent = AdvisoryLoop::new(
        source,
        Arc::new(orchestrator),
        SafetyFilter::new(cfg.safety_limits()),
        advisories.clone(),
        status.clone(),
        cfg.loop_config()?,
    );

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – stopping the advisory loop …"
                .yellow()
                .bold()
        );
        let _ = stop_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop with SIGKILL");
    }

    tokio::spawn(print_advisories(advisories.subscribe()));
    tokio::spawn(print_status(status.subscribe()));

    println!();
    agent.run(stop_rx).await;
    println!("{}", "  ✓ Advisory cleared.".green());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

async fn print_advisories(mut rx: watch::Receiver<PublishedAdvisory>) {
    let mut last_line = String::new();
    while rx.changed().await.is_ok() {
        let line = describe_advisory(&rx.borrow_and_update());
        if line != last_line {
            println!("  {line}");
            last_line = line;
        }
    }
}

async fn print_status(mut rx: watch::Receiver<AgentStatus>) {
    let mut last = (AgentState::Initializing, String::new());
    while rx.changed().await.is_ok() {
        let status = rx.borrow_and_update().clone();
        let key = (status.state, status.summary.clone());
        if key == last {
            continue;
        }
        let state = match status.state {
            AgentState::Active => "active".green(),
            AgentState::Degraded => "degraded".yellow(),
            AgentState::Error => "error".red(),
            AgentState::Disabled => "disabled".dimmed(),
            AgentState::Initializing => "initializing".normal(),
        };
        println!(
            "  {} [{}] {} {}",
            "status".dimmed(),
            state,
            format!("{} {}ms", status.backend, status.latency_ms).dimmed(),
            status.summary
        );
        last = key;
    }
}

fn describe_advisory(p: &PublishedAdvisory) -> String {
    let a = &p.advisory;
    if !a.any_active() {
        return format!("{}", "· no advisory".dimmed());
    }
    let mut parts = Vec::new();
    if a.speed.active {
        parts.push(format!(
            "{} {:.0} mph ({}, {:.2})",
            "speed".bold(),
            a.speed.target_ms / MPH_TO_MS,
            a.speed.source,
            a.speed.confidence
        ));
    }
    if a.lane.active {
        parts.push(format!(
            "{} {:?} ({}, {:.2})",
            "lane".bold(),
            a.lane.direction,
            a.lane.reason,
            a.lane.confidence
        ));
    }
    if a.alert.active {
        let text = match a.alert.severity {
            AlertSeverity::Critical => a.alert.text.red().bold(),
            AlertSeverity::Warning => a.alert.text.yellow(),
            AlertSeverity::Info => a.alert.text.normal(),
        };
        parts.push(format!("{} {}", "alert".bold(), text));
    }
    format!("#{} {}", p.seq, parts.join(" | "))
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___                 __       _         "#.bold().cyan());
    println!("{}", r#"  / _ \___  ___ ____  / /    __(_)__ ___  "#.bold().cyan());
    println!("{}", r#" / , _/ _ \/ _ `/ _ \/ / |/|/ / (_-</ -_) "#.bold().cyan());
    println!("{}", r#"/_/|_|\___/\_,_/\_,_/_/|__,__/_/___/\__/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Roadwise".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Driving advisory co-pilot");
    println!();
}
