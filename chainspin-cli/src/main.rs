//! Chainspin demo driver.
//!
//! Runs a slot session against the simulated chain: funds a wallet, starts
//! block production, spins the configured number of rounds and logs every
//! lifecycle event as it happens.

mod config;

use chainspin_core::engine::{EngineSettings, SlotEngine};
use chainspin_core::events::SpinEvent;
use chainspin_core::types::MICROS_PER_TOKEN;
use chainspin_core::types::spin::SpinPhase;
use chainspin_sandbox::{SandboxChain, SandboxSettings};
use clap::Parser;
use config::FileConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Chainspin - provably-fair slot engine demo
#[derive(Parser, Debug)]
#[command(name = "chainspin-cli")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./chainspin.toml")]
    config: PathBuf,

    /// Override the number of spins to run
    #[arg(long)]
    spins: Option<u32>,

    /// Override the bet per payline, in micro-units
    #[arg(long)]
    bet: Option<u64>,

    /// Override the number of active paylines
    #[arg(long)]
    paylines: Option<u32>,

    /// Override the sandbox seed
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    tracing::info!("Starting chainspin-cli v{}", env!("CARGO_PKG_VERSION"));

    let mut file_config = FileConfig::load(&args.config)?;
    if let Some(spins) = args.spins {
        file_config.session.spins = spins;
    }
    if let Some(bet) = args.bet {
        file_config.session.bet_per_line = bet;
    }
    if let Some(paylines) = args.paylines {
        file_config.session.paylines = paylines;
    }
    if let Some(seed) = args.seed {
        file_config.sandbox.seed = seed;
    }

    let chain = SandboxChain::with_default_machine(SandboxSettings {
        seed: file_config.sandbox.seed,
        blocks_until_claim: file_config.sandbox.blocks_until_claim,
        block_interval: Duration::from_millis(file_config.sandbox.block_interval_ms),
    });
    chain.fund(&file_config.wallet.address, file_config.wallet.funding).await;
    chain.start_mining();

    let engine = SlotEngine::new(
        chain.clone(),
        file_config.wallet.address.clone(),
        EngineSettings::default(),
    );
    engine.initialize().await?;

    let _events = engine.events().on_any(log_event);

    let starting_balance = engine.balance().await;
    tracing::info!(
        wallet = %file_config.wallet.address,
        balance_tokens = starting_balance / MICROS_PER_TOKEN,
        "session starting"
    );

    for round in 1..=file_config.session.spins {
        tracing::info!(round, "spinning");
        let id = match engine
            .spin(file_config.session.bet_per_line, file_config.session.paylines)
            .await
        {
            Ok(id) => id,
            Err(error) => {
                tracing::error!(round, error = %error, "spin rejected, ending session");
                break;
            }
        };
        wait_settled(&engine, id).await;
    }

    let state = engine.state().await;
    let completed = state
        .spin_queue
        .iter()
        .filter(|s| matches!(s.phase, SpinPhase::Completed { .. }))
        .count();
    let won = state
        .spin_queue
        .iter()
        .filter(|s| matches!(&s.phase, SpinPhase::Completed { winnings, .. } if *winnings > 0))
        .count();
    tracing::info!(
        spins = state.spin_queue.len(),
        completed,
        won,
        final_balance = state.balance,
        net = state.balance as i64 - starting_balance as i64,
        "session finished"
    );

    chain.stop_mining().await;
    engine.shutdown().await;
    Ok(())
}

/// Block until the given spin reaches a terminal phase.
async fn wait_settled(engine: &SlotEngine<SandboxChain>, id: Uuid) {
    let mut watcher = engine.on_state_change();
    loop {
        match engine.store().spin(id).await {
            Some(spin) if spin.is_terminal() => return,
            Some(_) => {}
            None => return,
        }
        if watcher.changed().await.is_err() {
            return;
        }
    }
}

fn log_event(event: &SpinEvent) {
    match event {
        SpinEvent::Queued {
            spin_id,
            total_bet,
            paylines,
        } => tracing::info!(spin_id = %spin_id, total_bet, paylines, "spin queued"),
        SpinEvent::Submitted {
            spin_id,
            tx_id,
            claim_block,
            ..
        } => tracing::info!(spin_id = %spin_id, tx_id = %tx_id, claim_block, "spin submitted"),
        SpinEvent::Claimed { spin_id, outcome } => tracing::info!(
            spin_id = %spin_id,
            block = outcome.block_number,
            lines = outcome.winning_lines.len(),
            "outcome claimed"
        ),
        SpinEvent::Completed { result } => tracing::info!(
            spin_id = %result.spin_id,
            winnings = result.winnings,
            net = result.net_profit,
            level = ?result.win_level,
            "spin completed"
        ),
        SpinEvent::WinTier {
            spin_id,
            level,
            payout,
        } => tracing::info!(spin_id = %spin_id, level = ?level, payout, "win!"),
        SpinEvent::Failed { spin_id, error } => {
            tracing::warn!(spin_id = ?spin_id, code = %error.code, error = %error.message, "spin failed")
        }
        SpinEvent::BalanceUpdated(update) => tracing::info!(
            balance = update.current,
            available = update.available,
            delta = update.delta,
            "balance updated"
        ),
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
