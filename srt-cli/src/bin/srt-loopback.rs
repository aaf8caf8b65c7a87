//! SRT Loopback - push data through the SRT buffers over a lossy in-process link
//!
//! Reads a file, stdin or synthetic data, sends it through the sender buffer,
//! a channel that drops every Nth packet, and the receiver buffer, then checks
//! that the delivered bytes match the input.

use anyhow::Context;
use clap::Parser;
use srt_cli::{display_compact_stats, display_link_stats, Loopback, LoopbackConfig};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "srt-loopback")]
#[command(about = "SRT buffer loopback over a lossy in-process link", long_about = None)]
struct Args {
    /// Input source: file path or '-' for stdin; synthetic data when omitted
    #[arg(short, long)]
    input: Option<String>,

    /// Bytes of synthetic data
    #[arg(long, default_value = "4194304")]
    size: usize,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the default configuration to this file and exit
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// Drop every Nth original transmission (overrides the configuration)
    #[arg(long)]
    loss_every: Option<u64>,

    /// Receiver latency in milliseconds (overrides the configuration)
    #[arg(long)]
    latency: Option<u64>,

    /// Print compact statistics while running
    #[arg(long)]
    progress: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn read_input(args: &Args) -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::new();
    match args.input.as_deref() {
        None => {
            tracing::info!("Generating {} bytes of synthetic data", args.size);
            data.extend((0..args.size).map(|i| (i % 251) as u8));
        }
        Some("-") => {
            tracing::info!("Reading stdin");
            io::stdin().read_to_end(&mut data)?;
        }
        Some(path) => {
            tracing::info!("Reading {}", path);
            let file = File::open(path).with_context(|| format!("opening {}", path))?;
            BufReader::new(file).read_to_end(&mut data)?;
        }
    }
    Ok(data)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(path) = &args.write_config {
        LoopbackConfig::default()
            .to_file(path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Default configuration written to {}", path.display());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => LoopbackConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LoopbackConfig::default(),
    };
    if let Some(n) = args.loss_every {
        config.channel.loss_every = n;
    }
    if let Some(latency) = args.latency {
        config.buffers.tsbpd.latency_ms = latency;
    }
    config.validate()?;

    let input = read_input(&args)?;
    tracing::info!(
        bytes = input.len(),
        message_size = config.channel.message_size,
        loss_every = config.channel.loss_every,
        tsbpd = config.buffers.tsbpd.enabled,
        "SRT loopback starting"
    );

    let base = Instant::now();
    let tick = config.channel.tick();
    let stats_interval = config.stats_interval();
    let per_tick = config.channel.messages_per_tick;
    // Simulated time allowed past the end of input before giving up
    let drain_limit = config.buffers.tsbpd.latency() * 10 + Duration::from_secs(10);

    let mut link = Loopback::new(config.clone(), base)?;
    let mut chunks = input.chunks(config.channel.message_size);
    let mut output = Vec::with_capacity(input.len());
    let mut now = base;
    let mut last_stats = base;
    let mut input_done_at = None;

    loop {
        for chunk in chunks.by_ref().take(per_tick) {
            link.send(chunk, now)?;
        }
        if input_done_at.is_none() && chunks.len() == 0 {
            tracing::debug!("End of input reached");
            input_done_at = Some(now);
        }

        for msg in link.tick(now) {
            output.extend_from_slice(&msg);
        }
        now += tick;

        if args.progress && now.duration_since(last_stats) >= stats_interval {
            display_compact_stats(&link.snapshot(now));
            last_stats = now;
        }

        if let Some(done) = input_done_at {
            if link.is_idle() {
                break;
            }
            if now.duration_since(done) > drain_limit {
                tracing::error!("Link did not drain");
                break;
            }
        }
    }

    if args.progress {
        println!();
    }
    let snapshot = link.snapshot(now);
    display_link_stats(&snapshot);

    if snapshot.stats.messages_dropped > 0 || snapshot.stats.packets_skipped > 0 {
        tracing::warn!(
            messages_dropped = snapshot.stats.messages_dropped,
            packets_skipped = snapshot.stats.packets_skipped,
            "data was dropped, skipping verification"
        );
        return Ok(());
    }
    if output != input {
        anyhow::bail!(
            "delivered data differs from input ({} of {} bytes delivered)",
            output.len(),
            input.len()
        );
    }
    tracing::info!(bytes = output.len(), "delivered data verified");
    Ok(())
}
