//! VetKeys channel simulation.
//!
//! Runs a group chat against the in-process issuance service and
//! sequencer: every participant sends once per ratchet epoch, everyone reads
//! everything, and halfway through the last participant is removed, which
//! starts a new key generation.
//!
//! # Usage
//!
//! ```bash
//! vetkeys-sim --participants 4 --rotation-secs 60 --epochs 10 --seed 7
//! RUST_LOG=vetkeys_client=debug vetkeys-sim
//! ```

use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use vetkeys_harness::{SimMessenger, SimWorld};

/// VetKeys channel simulation
#[derive(Parser, Debug)]
#[command(name = "vetkeys-sim")]
#[command(about = "Deterministic simulation of a VetKeys-encrypted group channel")]
#[command(version)]
struct Args {
    /// Number of channel members
    #[arg(short, long, default_value = "3")]
    participants: usize,

    /// Ratchet epoch length in seconds
    #[arg(long, default_value = "60")]
    rotation_secs: u64,

    /// Number of epochs to simulate
    #[arg(short, long, default_value = "6")]
    epochs: u64,

    /// Seed for every random choice in the run
    #[arg(short, long, default_value = "0")]
    seed: u64,

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

    let world = SimWorld::with_seed(args.seed);
    let rotation = Duration::from_secs(args.rotation_secs.max(1));
    let names: Vec<String> =
        (0..args.participants.max(1)).map(|i| format!("participant-{i}")).collect();
    let members: Vec<&str> = names.iter().map(String::as_str).collect();

    let (channel, _) = world.create_group(1, &members, rotation);
    let messengers: Vec<SimMessenger> = names.iter().map(|name| world.participant(name)).collect();
    info!(channel = %channel, participants = names.len(), ?rotation, "simulation starting");

    let mut active = messengers.len();
    let mut read_from = vec![0u64; messengers.len()];
    let mut failures = 0usize;

    for round in 0..args.epochs {
        if round == args.epochs / 2 && active > 2 {
            active -= 1;
            let metadata = world.change_members(&channel, &members[..active])?;
            info!(
                removed = members[active],
                generation = %metadata.generation,
                "membership changed"
            );
        }

        for (name, messenger) in names.iter().zip(&messengers).take(active) {
            let text = format!("{name} says hello in round {round}");
            let sent = messenger.send(&channel, round, text.as_bytes()).await?;
            debug!(sender = %name, generation = %sent.generation, epoch = sent.epoch, "sent");
        }

        for (i, messenger) in messengers.iter().enumerate().take(active) {
            for received in messenger.receive(&channel, read_from[i]).await? {
                read_from[i] = received.index + 1;
                match &received.plaintext {
                    Ok(plaintext) => debug!(
                        reader = %names[i],
                        sender = %received.sender,
                        text = %String::from_utf8_lossy(plaintext),
                        "received"
                    ),
                    Err(err) => {
                        failures += 1;
                        warn!(
                            reader = %names[i],
                            index = received.index,
                            error = %err,
                            "unreadable message"
                        );
                    },
                }
            }
        }

        world.env.advance(rotation);
    }

    for (name, messenger) in names.iter().zip(&messengers) {
        let keys = messenger.keys();
        info!(
            participant = %name,
            ratchets = ?keys.ratchet_versions(),
            background_failures = keys.background_log().len(),
            "final key state"
        );
    }
    info!(
        vetkeys_issued = world.issuance.vetkeys_issued(),
        messages = world.sequencer.len(&channel),
        failures,
        "simulation finished"
    );

    if failures > 0 {
        return Err(format!("{failures} messages could not be decrypted").into());
    }
    Ok(())
}
