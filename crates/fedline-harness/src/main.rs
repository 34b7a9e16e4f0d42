//! Fedline simulation binary.
//!
//! Runs a whole federation over the in-memory network on a paused clock:
//! create, join, exchange timestamped updates, optionally crash one process,
//! resign and destroy. The final manifest is logged and checked against the
//! manifest invariants.
//!
//! # Usage
//!
//! ```bash
//! # Three federates, ten updates each
//! fedline-sim --federates 3 --messages 10
//!
//! # Crash the second process after the exchange
//! fedline-sim --federates 4 --crash 1 --log-level debug
//! ```

use clap::Parser;
use fedline_core::{FederationConfig, TimeStatus};
use fedline_harness::{InvariantRegistry, TestCluster};
use fedline_proto::{Category, Message, ResignAction};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const CHANNEL: &str = "fedline-sim";
const MODEL: &[u8] = b"fedline-sim object model";

/// Fedline federation simulator
#[derive(Parser, Debug)]
#[command(name = "fedline-sim")]
#[command(about = "Simulate a Fedline federation over an in-memory network")]
#[command(version)]
struct Args {
    /// Number of federate processes
    #[arg(short, long, default_value = "3")]
    federates: usize,

    /// Seed for member identities
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Timestamped updates sent by each federate
    #[arg(short, long, default_value = "10")]
    messages: u32,

    /// Crash this process (by index) without a goodbye after the exchange
    #[arg(long)]
    crash: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_time().start_paused(true).build()?;

    runtime.block_on(run(args))
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.federates == 0 {
        return Err("at least one federate is required".into());
    }

    tracing::info!(federates = args.federates, seed = args.seed, "simulation starting");

    let config = FederationConfig::default();
    let mut cluster = TestCluster::new(args.seed, args.federates, CHANNEL, &config)?;

    cluster.connect_all().await?;
    cluster.create(0, MODEL).await?;

    for index in 0..args.federates {
        cluster.process(index).time.set(TimeStatus::constrained());
        let handle = cluster.join(index, &format!("federate-{index}")).await?;
        tracing::info!(index, handle, "federate joined");
    }

    for step in 1..=args.messages {
        for index in 0..args.federates {
            let update = Message::timestamped(
                0,
                f64::from(step),
                Category::Reflection,
                format!("update {step} from {index}").into_bytes(),
            );
            cluster.send(index, update).await?;
        }
    }

    let horizon = f64::from(args.messages);
    for index in cluster.live() {
        let process = cluster.process(index);
        let Some(session) = process.session.as_ref() else {
            continue;
        };

        process.time.update(|status| status.advance_requested(horizon));
        session.queue().wake();
        let delivered = session.scheduler().tick_until_empty(config.tick_timeout).await?;
        process.time.update(|status| status.advance_granted(horizon));

        tracing::info!(federate = %session.name(), delivered, time = horizon, "advance granted");
    }

    if let Some(victim) = args.crash {
        if victim < args.federates {
            cluster.crash(victim).await;
            for index in cluster.live() {
                let resignations = cluster.process(index).handler.resignations();
                tracing::info!(index, resignations = resignations.len(), "survivor notified");
            }
        } else {
            tracing::warn!(victim, federates = args.federates, "crash index out of range, ignored");
        }
    }

    for index in cluster.live() {
        if cluster.process(index).session.is_some() {
            cluster.resign(index, ResignAction::DeleteObjectsAndReleaseAttributes).await?;
        }
    }

    if let Some(&first) = cluster.live().first() {
        cluster.destroy(first).await?;
        if let Some(manifest) = cluster.process(first).federation.manifest() {
            tracing::info!("final manifest\n{manifest}");
        }
    }

    if let Err(violations) = InvariantRegistry::quiescent().check_all(&cluster.snapshot()) {
        for violation in &violations {
            tracing::error!(%violation, "invariant violated");
        }
        return Err(format!("{} invariant violations", violations.len()).into());
    }

    tracing::info!(broadcasts = cluster.network.broadcasts(), "simulation complete");
    Ok(())
}
