//! Chorus simulation binary.
//!
//! # Usage
//!
//! ```bash
//! # Five members, 1000 messages, rotate every 50
//! chorus-sim --members 5 --messages 1000 --rotate-every 50
//!
//! # Reproduce a run with verbose protocol logs
//! RUST_LOG=chorus_session=debug chorus-sim --seed 42
//! ```

use std::time::Duration;

use chorus_crypto::MAX_SKIP;
use chorus_session::SessionConfig;
use chorus_sim::SimConfig;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chorus group messaging simulation
#[derive(Parser, Debug)]
#[command(name = "chorus-sim")]
#[command(about = "Simulate sender-key group messaging with reordering and rotation")]
#[command(version)]
struct Args {
    /// RNG seed
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Number of group members
    #[arg(short, long, default_value = "3")]
    members: usize,

    /// Number of messages to send
    #[arg(long, default_value = "100")]
    messages: u32,

    /// Envelopes held in flight before delivery
    #[arg(long, default_value = "8")]
    reorder_window: usize,

    /// Rotate the sender's key before every n-th message
    #[arg(long)]
    rotate_every: Option<u32>,

    /// Simulated milliseconds between sends
    #[arg(long, default_value = "10")]
    tick_millis: u64,

    /// Maximum ratchet skip per message
    #[arg(long, default_value_t = MAX_SKIP)]
    max_skip: u32,

    /// Seconds a retired sender key stays usable
    #[arg(long, default_value = "86400")]
    retired_key_ttl_secs: u64,

    /// Retired keys kept per sender
    #[arg(long, default_value = "2")]
    max_retired_keys: usize,

    /// Keep the sender key when a member is removed
    #[arg(long)]
    no_rotate_on_remove: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = SimConfig {
        seed: args.seed,
        members: args.members,
        messages: args.messages,
        reorder_window: args.reorder_window,
        rotate_every: args.rotate_every,
        tick_millis: args.tick_millis,
        session: SessionConfig {
            max_skip: args.max_skip,
            retired_key_ttl: Duration::from_secs(args.retired_key_ttl_secs),
            max_retired_keys_per_sender: args.max_retired_keys,
            rotate_on_remove: !args.no_rotate_on_remove,
        },
    };

    tracing::info!(seed = config.seed, members = config.members, "Chorus simulation starting");

    let report = chorus_sim::run(&config).await?;

    if report.rejected > 0 {
        tracing::warn!(
            rejected = report.rejected,
            redistribution_requests = report.redistribution_requests,
            "some deliveries were rejected"
        );
    }

    Ok(())
}
