//! CLI command definitions for consensus-forge.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::debate::{
    DebateEngine, DebateEvent, DebateRequest, DebateResult, ModeratorDecision, WebhookNotifier,
};
use crate::llm::{ProviderKind, ProviderRegistry, RedisResponseCache};
use crate::metrics::{gather_metrics, init_metrics};
use crate::orchestrator::{
    DebatePattern, DebateSequence, Orchestrator, OrchestratorError, PatternSelector,
};
use crate::storage::SqliteSessionStore;

/// Multi-expert LLM debates with consensus scoring.
#[derive(Parser)]
#[command(name = "consensus-forge")]
#[command(about = "Run multi-expert LLM debates and orchestrate them into decisions")]
#[command(version)]
#[command(
    long_about = "consensus-forge convenes a panel of LLM-backed experts, runs debate rounds until they converge, and reports a ranked recommendation.\n\nExample usage:\n  consensus-forge debate \"Should we move billing to Postgres?\" --max-rounds 3\n  consensus-forge orchestrate \"Should we use Postgres, MySQL, SQLite or MongoDB?\""
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file. Environment overrides still apply.
    #[arg(short, long, global = true, env = "CONSENSUS_FORGE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run one debate to a conclusion.
    Debate(DebateArgs),

    /// Analyze a question, pick a pattern and run the phased debates.
    #[command(alias = "orch")]
    Orchestrate(OrchestrateArgs),

    /// Show question signals and the selected pattern without calling any model.
    Analyze(AnalyzeArgs),

    /// Resolve the expert panel for a question without running it.
    Panel(PanelArgs),
}

/// Arguments for `consensus-forge debate`.
#[derive(Parser, Debug)]
pub struct DebateArgs {
    /// The question to debate.
    pub question: String,

    /// Domain context included in every expert prompt.
    #[arg(long)]
    pub context: Option<String>,

    /// Number of experts on the panel.
    #[arg(short = 'n', long)]
    pub panel_size: Option<usize>,

    /// Maximum number of rounds.
    #[arg(short = 'r', long)]
    pub max_rounds: Option<u32>,

    /// Consensus threshold in [0, 1].
    #[arg(short = 't', long)]
    pub threshold: Option<f64>,

    /// Bind every expert to one provider (openrouter, litellm).
    #[arg(short = 'p', long)]
    pub provider: Option<ProviderKind>,

    /// Print Prometheus metrics after the debate.
    #[arg(long)]
    pub metrics: bool,

    /// Output JSON to stdout instead of progress lines.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `consensus-forge orchestrate`.
#[derive(Parser, Debug)]
pub struct OrchestrateArgs {
    /// The question to decide.
    pub question: String,

    /// Domain context included in every sub-debate.
    #[arg(long)]
    pub context: Option<String>,

    /// Force a pattern (single, tournament, adversarial, ensemble).
    #[arg(long)]
    pub pattern: Option<DebatePattern>,

    /// Number of experts on each panel.
    #[arg(short = 'n', long)]
    pub panel_size: Option<usize>,

    /// Consensus threshold in [0, 1].
    #[arg(short = 't', long)]
    pub threshold: Option<f64>,

    /// Bind every expert to one provider (openrouter, litellm).
    #[arg(short = 'p', long)]
    pub provider: Option<ProviderKind>,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `consensus-forge analyze`.
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// The question to analyze.
    pub question: String,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `consensus-forge panel`.
#[derive(Parser, Debug)]
pub struct PanelArgs {
    /// The question the panel is for.
    pub question: String,

    /// Domain context used for expert matching.
    #[arg(long)]
    pub context: Option<String>,

    /// Number of experts on the panel.
    #[arg(short = 'n', long)]
    pub panel_size: Option<usize>,

    /// Bind every expert to one provider (openrouter, litellm).
    #[arg(short = 'p', long)]
    pub provider: Option<ProviderKind>,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Analyze(args) => run_analyze_command(args),
        Commands::Debate(args) => run_debate_command(args, load_config(&cli.config)?).await,
        Commands::Orchestrate(args) => {
            run_orchestrate_command(args, load_config(&cli.config)?).await
        }
        Commands::Panel(args) => run_panel_command(args, load_config(&cli.config)?),
    }
}

fn load_config(path: &Option<PathBuf>) -> anyhow::Result<EngineConfig> {
    EngineConfig::load(path.as_deref()).context("Failed to load engine configuration")
}

// ============================================================================
// Engine Construction
// ============================================================================

async fn build_engine(config: EngineConfig) -> anyhow::Result<DebateEngine> {
    let registry = ProviderRegistry::from_env()
        .context("No LLM provider configured; set OPENROUTER_API_KEY or LITELLM_API_BASE")?;
    info!(providers = ?registry.kinds(), "Providers registered");

    let mut engine = DebateEngine::new(config.clone(), registry);

    if config.cache.enabled {
        if let Some(url) = &config.cache.redis_url {
            // The in-memory cache stays in place when Redis is unreachable.
            match RedisResponseCache::connect(url, "consensus-forge").await {
                Ok(cache) => engine = engine.with_cache(Arc::new(cache)),
                Err(e) => warn!(error = %e, "Redis cache unavailable, using in-memory cache"),
            }
        }
    }

    if let Some(url) = &config.storage.database_url {
        let store = SqliteSessionStore::open(url)
            .await
            .with_context(|| format!("Failed to open session store at {}", url))?;
        engine = engine.with_store(Arc::new(store));
    }

    if let Some(url) = &config.storage.webhook_url {
        engine = engine.with_notifier(Arc::new(WebhookNotifier::new(url.clone())));
    }

    Ok(engine)
}

fn apply_common(
    mut request: DebateRequest,
    context: Option<String>,
    panel_size: Option<usize>,
    threshold: Option<f64>,
    provider: Option<ProviderKind>,
) -> DebateRequest {
    if let Some(context) = context {
        request = request.with_context(context);
    }
    if let Some(size) = panel_size {
        request = request.with_panel_size(size);
    }
    if let Some(threshold) = threshold {
        request = request.with_consensus_threshold(threshold);
    }
    if let Some(provider) = provider {
        request = request.with_pinned_provider(provider);
    }
    request
}

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))
}

// ============================================================================
// Debate Command
// ============================================================================

async fn run_debate_command(args: DebateArgs, config: EngineConfig) -> anyhow::Result<()> {
    init_metrics().context("Failed to initialize metrics")?;
    let engine = build_engine(config).await?;

    let mut request = apply_common(
        DebateRequest::new(args.question.clone()),
        args.context.clone(),
        args.panel_size,
        args.threshold,
        args.provider,
    );
    if let Some(rounds) = args.max_rounds {
        request = request.with_max_rounds(rounds);
    }

    let mut events = engine.events().subscribe();
    let handle = engine.start(request).await.context("Failed to start debate")?;
    let session_id = handle.session_id();

    let progress = (!args.json).then(|| {
        let session_id = session_id.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.session_id() == session_id => {
                        print_event(&event);
                        if event.is_done() {
                            break;
                        }
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let control = handle.control().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, forcing a conclusion");
            if let Err(e) = control.force_consensus().await {
                warn!(error = %e, "Could not force a conclusion");
            }
        }
    });

    let result = handle.wait().await.context("Debate task failed")?;
    interrupt.abort();
    if let Some(progress) = progress {
        let _ = progress.await;
    }

    if args.json {
        println!("{}", to_json(&result)?);
    } else {
        print_result(&result);
        let report = engine.cost_tracker().get_cost_report();
        println!(
            "  Spend today: ${:.4} (${:.4} remaining)",
            report.daily_spent, report.daily_remaining
        );
    }
    if args.metrics {
        println!("{}", gather_metrics());
    }

    if !result.is_success() {
        anyhow::bail!(
            "Debate failed: {}",
            result.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_event(event: &DebateEvent) {
    match event {
        DebateEvent::RoundCompleted {
            round_number,
            opinions,
            failures,
            consensus_score,
            has_consensus,
            ..
        } => println!(
            "  Round {}: {} opinions, {} failures, consensus {:.2}{}",
            round_number,
            opinions,
            failures,
            consensus_score,
            if *has_consensus { " (reached)" } else { "" }
        ),
        DebateEvent::ExpertFailed {
            expert_id, reason, ..
        } => println!("    ! {} failed: {}", expert_id, reason),
        DebateEvent::ModeratorIntervened { decision, .. } => match decision {
            ModeratorDecision::Continue => {}
            other => println!("    moderator: {}", other.label()),
        },
        DebateEvent::SessionUpdated { .. } | DebateEvent::Done { .. } => {}
    }
}

fn print_result(result: &DebateResult) {
    println!("✓ Debate {}", result.status);
    println!("  Session: {}", result.session_id);
    println!(
        "  Rounds: {}, consensus {:.2}, cost ${:.4}",
        result.total_rounds, result.consensus_score, result.total_cost_usd
    );
    if let Some(err) = &result.error_message {
        println!("  Error: {}", err);
    }
    for (rank, option) in result.final_ranking.iter().enumerate() {
        println!(
            "  {}. {} (score {:.2}, confidence {:.2}, backed by {})",
            rank + 1,
            option.text,
            option.score,
            option.confidence,
            option.supporters.join(", ")
        );
    }
}

// ============================================================================
// Orchestrate Command
// ============================================================================

async fn run_orchestrate_command(args: OrchestrateArgs, config: EngineConfig) -> anyhow::Result<()> {
    init_metrics().context("Failed to initialize metrics")?;
    let settings = config.orchestrator.clone();
    let engine = build_engine(config).await?;

    let template = apply_common(
        DebateRequest::default(),
        args.context.clone(),
        args.panel_size,
        args.threshold,
        args.provider,
    );
    let mut selector = PatternSelector::new();
    if let Some(pattern) = args.pattern {
        selector = selector.with_override(pattern);
    }

    let orchestrator = Orchestrator::new(Arc::new(engine), settings)
        .with_selector(selector)
        .with_template(template);
    let sequence = match orchestrator.run(&args.question).await {
        Ok(sequence) => sequence,
        Err(OrchestratorError::PhaseFailed {
            phase,
            reason,
            partial,
        }) => {
            if args.json {
                println!("{}", to_json(&partial)?);
            } else {
                println!("✗ Orchestration stopped ({})", partial.pattern);
                print_sequence(&partial);
            }
            anyhow::bail!("Orchestration stopped in phase '{}': {}", phase, reason);
        }
        Err(e) => return Err(e).context("Orchestration failed"),
    };

    if args.json {
        println!("{}", to_json(&sequence)?);
    } else {
        println!("✓ Orchestration finished ({})", sequence.pattern);
        print_sequence(&sequence);
    }
    if args.metrics {
        println!("{}", gather_metrics());
    }
    Ok(())
}

fn print_sequence(sequence: &DebateSequence) {
    for phase in sequence.phases() {
        println!("  Phase {}:", phase.name);
        for sub in &phase.sub_debates {
            let outcome = match (&sub.result, &sub.error) {
                (Some(result), _) => format!(
                    "{} after {} rounds, consensus {:.2}",
                    result.status, result.total_rounds, result.consensus_score
                ),
                (None, Some(err)) => format!("not run: {}", err),
                (None, None) => "not run".to_string(),
            };
            println!("    - {}: {}", sub.label, outcome);
        }
        if !phase.advancing.is_empty() && sequence.pattern == DebatePattern::Tournament {
            println!("    advancing: {}", phase.advancing.join(", "));
        }
    }
    println!(
        "  Totals: {} rounds, ${:.4}",
        sequence.total_rounds(),
        sequence.total_cost_usd()
    );
    match &sequence.conclusion {
        Some(conclusion) => {
            println!("  Recommendation: {}", conclusion.recommendation);
            println!(
                "  Consensus {:.2}, confidence {:.2}",
                conclusion.consensus_score, conclusion.confidence
            );
            if !conclusion.reasoning.is_empty() {
                println!("  Reasoning: {}", conclusion.reasoning);
            }
        }
        None => println!("  No conclusion was reached."),
    }
}

// ============================================================================
// Analyze & Panel Commands
// ============================================================================

fn run_analyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    let (signals, pattern) = PatternSelector::new().analyze(&args.question);

    if args.json {
        #[derive(Serialize)]
        struct AnalyzeOutput<'a> {
            question: &'a str,
            pattern: DebatePattern,
            signals: &'a crate::orchestrator::QuestionSignals,
        }
        println!(
            "{}",
            to_json(&AnalyzeOutput {
                question: &args.question,
                pattern,
                signals: &signals,
            })?
        );
    } else {
        println!("Pattern: {}", pattern);
        println!("  Scale: {:?}", signals.scale);
        println!("  Risk: {:?}", signals.risk);
        println!("  Irreversible: {}", signals.irreversible);
        if signals.options.is_empty() {
            println!("  Options: none detected");
        } else {
            println!("  Options: {}", signals.options.join(" | "));
        }
    }
    Ok(())
}

fn run_panel_command(args: PanelArgs, config: EngineConfig) -> anyhow::Result<()> {
    // No model is called, so an empty registry is enough.
    let engine = DebateEngine::new(config, ProviderRegistry::new());
    let request = apply_common(
        DebateRequest::new(args.question.clone()),
        args.context.clone(),
        args.panel_size,
        None,
        args.provider,
    );
    let panel = engine
        .resolve_panel(&request)
        .context("Panel resolution failed")?;

    if args.json {
        println!("{}", to_json(&panel)?);
    } else {
        println!("Panel of {} experts:", panel.len());
        for expert in &panel {
            println!(
                "  - {} [{}] via {}/{}",
                expert.name,
                expert.expertise.join(", "),
                expert.ai_config.provider,
                expert.ai_config.model_id
            );
            if !expert.fallbacks.is_empty() {
                let chain: Vec<&str> = expert.fallbacks.iter().map(|f| f.model_id.as_str()).collect();
                println!("      fallbacks: {}", chain.join(" -> "));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_debate_args() {
        let cli = Cli::try_parse_from([
            "consensus-forge",
            "debate",
            "Should we adopt Rust?",
            "--max-rounds",
            "3",
            "--provider",
            "litellm",
            "-j",
        ])
        .unwrap();
        match cli.command {
            Commands::Debate(args) => {
                assert_eq!(args.question, "Should we adopt Rust?");
                assert_eq!(args.max_rounds, Some(3));
                assert_eq!(args.provider, Some(ProviderKind::LiteLlm));
                assert!(args.json);
            }
            _ => panic!("expected debate command"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_parse_orchestrate_pattern() {
        let cli = Cli::try_parse_from([
            "consensus-forge",
            "--log-level",
            "debug",
            "orchestrate",
            "Tea or coffee?",
            "--pattern",
            "adversarial",
        ])
        .unwrap();
        match cli.command {
            Commands::Orchestrate(args) => {
                assert_eq!(args.pattern, Some(DebatePattern::Adversarial));
            }
            _ => panic!("expected orchestrate command"),
        }
        assert_eq!(cli.log_level, "debug");

        assert!(Cli::try_parse_from([
            "consensus-forge",
            "orchestrate",
            "Tea or coffee?",
            "--pattern",
            "chaos",
        ])
        .is_err());
    }

    #[test]
    fn test_apply_common_sets_request_fields() {
        let request = apply_common(
            DebateRequest::new("q"),
            Some("ctx".into()),
            Some(5),
            Some(1.4),
            Some(ProviderKind::OpenRouter),
        );
        assert_eq!(request.context.as_deref(), Some("ctx"));
        assert_eq!(request.panel_size, Some(5));
        assert_eq!(request.consensus_threshold, Some(1.0));
        assert_eq!(request.pinned_provider, Some(ProviderKind::OpenRouter));
    }

    #[test]
    fn test_analyze_runs_without_providers() {
        let args = AnalyzeArgs {
            question: "Should we use Postgres or MySQL?".into(),
            json: true,
        };
        run_analyze_command(args).unwrap();
    }
}
