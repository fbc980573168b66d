use anyhow::{bail, Context, Result};
use cardreader::{
    AttentionRouting, CaptureChannel, CardImage, DeviceManager, InvalidPunchPolicy, IoCommand,
    TextDeck, UnitConfig, UnitId, DEFAULT_RECORD_DELAY,
};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Feed a text deck through an emulated IBM 7000-series card reader.
#[derive(Parser, Debug)]
#[command(
    name = "cardreader",
    version,
    about = "Punch text into 80-column cards and read them back through an emulated channel"
)]
struct Cli {
    /// Input file (default: read from stdin)
    file: Option<String>,

    /// Number of reader units to deal the deck across
    #[arg(long, default_value_t = 1)]
    units: usize,

    /// What the reader does with an unreadable hole pattern
    #[arg(long, value_enum, default_value = "substitute")]
    invalid_punch: PunchPolicy,

    /// Ready-attention line after each feed cycle
    #[arg(long, value_enum, default_value = "none")]
    attention: Routing,

    /// 1-based column checked for the load-card 12 punch (0 disables)
    #[arg(long, default_value_t = 0)]
    load_column: usize,

    /// Record-to-record wait time, in ticks
    #[arg(long, default_value_t = DEFAULT_RECORD_DELAY)]
    record_delay: u64,

    /// Emit a JSON run report instead of plain record text
    #[arg(long)]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PunchPolicy {
    Substitute,
    Abort,
}

impl From<PunchPolicy> for InvalidPunchPolicy {
    fn from(policy: PunchPolicy) -> Self {
        match policy {
            PunchPolicy::Substitute => InvalidPunchPolicy::Substitute,
            PunchPolicy::Abort => InvalidPunchPolicy::AbortRecord,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Routing {
    None,
    LineA,
    LineB,
}

impl From<Routing> for AttentionRouting {
    fn from(routing: Routing) -> Self {
        match routing {
            Routing::None => AttentionRouting::None,
            Routing::LineA => AttentionRouting::LineA,
            Routing::LineB => AttentionRouting::LineB,
        }
    }
}

#[derive(Serialize)]
struct RunReport {
    generated_at: DateTime<Utc>,
    deck_sha256: String,
    cards: usize,
    units: usize,
    final_tick: u64,
    read_errors: usize,
    records: Vec<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).compact())
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if cli.units == 0 {
        bail!("at least one reader unit is required");
    }

    let input = if let Some(f) = &cli.file {
        fs::read_to_string(f).with_context(|| format!("failed to read {f}"))?
    } else {
        let mut s = String::new();
        io::stdin().read_to_string(&mut s)?;
        s
    };

    let deck = TextDeck::from_text(&input).context("input cannot be punched")?;
    let cards = deck.into_cards();
    let total = cards.len();

    let mut machine = DeviceManager::new();
    let mut units: Vec<UnitId> = Vec::with_capacity(cli.units);
    for _ in 0..cli.units {
        let chan = machine.add_channel(CaptureChannel::new());
        let unit = machine.add_unit(UnitConfig {
            channel: chan,
            attention: cli.attention.into(),
            invalid_punch: cli.invalid_punch.into(),
            load_column: cli.load_column,
            record_delay: cli.record_delay,
            ..UnitConfig::default()
        })?;
        units.push(unit);
    }

    // Deal the deck round-robin across the units, then read in the same
    // order so the merged records come back in input order.
    let mut hoppers: Vec<Vec<CardImage>> = vec![Vec::new(); cli.units];
    for (i, card) in cards.into_iter().enumerate() {
        hoppers[i % cli.units].push(card);
    }
    for (unit, hopper) in units.iter().zip(hoppers) {
        machine.attach(*unit, Box::new(TextDeck::from_cards(hopper)));
    }

    let mut records = Vec::with_capacity(total);
    let mut read_errors = 0;
    for round in 0..total {
        let unit = units[round % cli.units];
        let chan = machine.unit(unit).config().channel;
        let delivered = machine.channel(chan).records().len();
        machine.dispatch(unit, IoCommand::Read, 0)?;
        machine.run_until_idle();
        if machine.unit(unit).read_error() {
            read_errors += 1;
        }
        // An aborted or failed transfer delivers no record for this card.
        if machine.channel(chan).records().len() > delivered {
            if let Some(record) = machine.channel(chan).record_texts().last() {
                records.push(record.clone());
            }
        }
    }

    if cli.json {
        let report = RunReport {
            generated_at: Utc::now(),
            deck_sha256: format!("{:x}", Sha256::digest(input.as_bytes())),
            cards: total,
            units: cli.units,
            final_tick: machine.now(),
            read_errors,
            records,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for record in &records {
            println!("{}", record.trim_end());
        }
        eprintln!(
            "read {total} cards on {} unit(s) in {} ticks ({read_errors} read errors)",
            cli.units,
            machine.now()
        );
    }

    Ok(())
}
