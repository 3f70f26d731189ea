use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tribunal::council::test_support::ScenarioAdvisor;
use tribunal::council::{claude_cli, Advisor, VotingPolicy};
use tribunal::ledger::PositionLedger;
use tribunal::models::{ActionKind, CloseReason, TribunalConfig};
use tribunal::{DecisionRequest, EngineError};

#[derive(Parser, Debug)]
#[command(
    name = "tribunal",
    about = "Multi-advisor consensus decisions over a position ledger"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/tribunal.toml")]
    config: String,

    /// Pretty-print the output JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decide on a DecisionRequest and apply the approved ledger change
    Decide {
        /// Read DecisionRequest JSON from a file instead of stdin
        #[arg(short, long)]
        input: Option<String>,

        /// Use the rule-based advisors instead of the Claude CLI
        #[arg(long)]
        offline: bool,
    },
    /// Inspect or edit the position ledger directly
    Ledger {
        #[command(subcommand)]
        action: LedgerCommand,
    },
    /// Validate the configuration and show the effective voting table
    CheckConfig,
}

#[derive(Subcommand, Debug)]
enum LedgerCommand {
    /// Show positions, or one instrument's position with optional mark-to-market
    Show {
        #[arg(long)]
        instrument: Option<String>,
        #[arg(long)]
        price: Option<Decimal>,
        /// Include closed and archived positions
        #[arg(long)]
        all: bool,
    },
    /// Open a position with its first entry
    Open {
        #[arg(long)]
        instrument: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        price: Decimal,
        #[arg(long)]
        amount: Decimal,
        #[arg(long, default_value = "")]
        rationale: String,
    },
    /// Append an averaging entry to an open position
    Add {
        #[arg(long)]
        instrument: String,
        #[arg(long)]
        price: Decimal,
        #[arg(long)]
        amount: Decimal,
        #[arg(long, default_value = "")]
        rationale: String,
    },
    /// Close an open position
    Close {
        #[arg(long)]
        instrument: String,
        #[arg(long)]
        price: Decimal,
        #[arg(long, value_enum, default_value_t = ReasonArg::Manual)]
        reason: ReasonArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ReasonArg {
    TakeProfit,
    Manual,
    Exit,
    StopLoss,
    EmergencyExit,
}

impl From<ReasonArg> for CloseReason {
    fn from(arg: ReasonArg) -> Self {
        match arg {
            ReasonArg::TakeProfit => CloseReason::TakeProfit,
            ReasonArg::Manual => CloseReason::Manual,
            ReasonArg::Exit => CloseReason::Exit,
            ReasonArg::StopLoss => CloseReason::StopLoss,
            ReasonArg::EmergencyExit => CloseReason::EmergencyExit,
        }
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}

fn load_config(path: &str) -> Result<TribunalConfig> {
    let config_str =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {path}"))?;
    toml::from_str(&config_str).with_context(|| format!("Failed to parse config: {path}"))
}

fn open_ledger(config: &TribunalConfig) -> Result<PositionLedger> {
    let store = tribunal::open_ledger_store(config).with_context(|| {
        format!("Failed to open ledger: {}", config.ledger.sqlite_path)
    })?;
    PositionLedger::new(Box::new(store), config.averaging.max_averaging_count)
        .context("Failed to load ledger")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Respects RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Decide { input, offline } => decide(&config, input, offline, cli.pretty).await,
        Command::Ledger { action } => ledger(&config, action, cli.pretty),
        Command::CheckConfig => check_config(&config, cli.pretty).await,
    }
}

async fn decide(
    config: &TribunalConfig,
    input: Option<String>,
    offline: bool,
    pretty: bool,
) -> Result<()> {
    let request_json = if let Some(input_path) = &input {
        std::fs::read_to_string(input_path)
            .with_context(|| format!("Failed to read input: {input_path}"))?
    } else {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read from stdin")?;
        buf
    };
    let request: DecisionRequest =
        serde_json::from_str(&request_json).context("Failed to parse DecisionRequest JSON")?;

    let engine = if offline {
        let advisors: Vec<Arc<dyn Advisor>> = config
            .advisors
            .advisors
            .iter()
            .filter(|a| a.enabled)
            .map(|a| Arc::new(ScenarioAdvisor::new(&a.id, &a.role)) as Arc<dyn Advisor>)
            .collect();
        let store = tribunal::open_ledger_store(config).context("Failed to open ledger")?;
        tribunal::build_engine_with(config, advisors, Box::new(store))
    } else {
        tribunal::build_engine(config)
    }
    .context("Failed to build decision engine")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received interrupt, cancelling decision");
        on_signal.cancel();
    });

    let outcome = match engine.decide(&request, &cancel).await {
        Ok(outcome) => outcome,
        Err(EngineError::Cancelled) => anyhow::bail!("Decision cancelled"),
        Err(e) => return Err(anyhow::anyhow!("Decision failed: {e}")),
    };

    print_json(&outcome, pretty)
}

fn ledger(config: &TribunalConfig, action: LedgerCommand, pretty: bool) -> Result<()> {
    let ledger = open_ledger(config)?;

    match action {
        LedgerCommand::Show {
            instrument: Some(instrument),
            price,
            ..
        } => {
            let position = ledger
                .get(&instrument)?
                .with_context(|| format!("No position for {instrument}"))?;
            let unrealized = price.map(|p| position.unrealized_pnl(p));
            print_json(
                &serde_json::json!({
                    "summary": position.summary(),
                    "position": position,
                    "unrealized": unrealized,
                }),
                pretty,
            )
        }
        LedgerCommand::Show {
            instrument: None,
            all,
            ..
        } => {
            let mut positions = ledger.open_positions()?;
            if all {
                positions.extend(ledger.closed_positions()?);
            }
            let summaries: Vec<_> = positions.iter().map(|p| p.summary()).collect();
            print_json(&summaries, pretty)
        }
        LedgerCommand::Open {
            instrument,
            name,
            price,
            amount,
            rationale,
        } => {
            let name = name.unwrap_or_else(|| instrument.clone());
            let position = ledger.open(&instrument, &name, price, amount, &rationale)?;
            print_json(&position.summary(), pretty)
        }
        LedgerCommand::Add {
            instrument,
            price,
            amount,
            rationale,
        } => {
            let position = ledger.add_entry(&instrument, price, amount, &rationale)?;
            print_json(&position.summary(), pretty)
        }
        LedgerCommand::Close {
            instrument,
            price,
            reason,
        } => {
            let realized = ledger.close(&instrument, price, reason.into())?;
            print_json(&realized, pretty)
        }
    }
}

async fn check_config(config: &TribunalConfig, pretty: bool) -> Result<()> {
    let advisors = tribunal::build_advisors(config).context("Invalid advisor configuration")?;
    let policy =
        VotingPolicy::with_overrides(advisors.len() as u32, config.voting.overrides.clone());

    let mut kinds = vec![
        ActionKind::Entry,
        ActionKind::Exit,
        ActionKind::TakeProfit,
        ActionKind::StopLoss,
        ActionKind::EmergencyExit,
        ActionKind::AveragingAdd,
    ];
    let custom: Vec<ActionKind> = config
        .voting
        .overrides
        .keys()
        .map(|k| ActionKind::from(k.as_str()))
        .filter(|k| matches!(k, ActionKind::Other(_)))
        .collect();
    kinds.extend(custom);

    let requirements: serde_json::Map<String, serde_json::Value> = kinds
        .iter()
        .map(|kind| (kind.to_string(), policy.requirement(kind).into()))
        .collect();

    let cli_available = if advisors.is_empty() {
        None
    } else {
        Some(claude_cli::check_cli_available(&config.advisors.claude_binary).await)
    };
    if cli_available == Some(false) {
        tracing::warn!("claude CLI not found; advisors will abstain until it is installed");
    }

    let advisor_list: Vec<_> = advisors
        .iter()
        .map(|a| serde_json::json!({"id": a.id(), "role": a.role()}))
        .collect();

    print_json(
        &serde_json::json!({
            "advisors": advisor_list,
            "dry_run": advisors.is_empty(),
            "per_advisor_timeout_seconds": config.advisors.per_advisor_timeout_seconds,
            "total_timeout_seconds": config.advisors.total_timeout_seconds,
            "claude_binary": config.advisors.claude_binary,
            "requirements": requirements,
            "ledger": config.ledger.sqlite_path,
            "max_averaging_count": config.averaging.max_averaging_count,
            "claude_cli_available": cli_available,
        }),
        pretty,
    )
}
