use anyhow::Result;
use clap::Parser;
use common::{ChannelId, ChannelSelection, Handshake, SampleFormat, DEFAULT_EXPERIMENT};
use std::net::SocketAddr;
use std::time::Duration;
use stream_receiver::{LoggingConsumer, ReceiverConfig, StreamReceiver, WatchdogConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Connects to a stream server and logs what arrives
#[derive(Parser, Debug)]
#[command(name = "stream-receiver", version)]
struct Args {
    /// Server address
    #[arg(long, env = "MEA_STREAM_ADDR", default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Experiment to request in the handshake
    #[arg(long, default_value = DEFAULT_EXPERIMENT)]
    experiment: String,

    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..60))]
    channel: u8,

    /// Receive all 60 channels
    #[arg(long)]
    reflect: bool,

    #[arg(long, default_value_t = common::PLAYBACK_SEGMENT_LENGTH)]
    segment_length: usize,

    /// Server runs with --auto-setup (or --live); don't send a handshake
    #[arg(long)]
    no_handshake: bool,

    /// Read int32 raw units, e.g. straight from the instrument data port
    #[arg(long)]
    raw: bool,

    #[arg(long, default_value_t = common::DEFAULT_SAMPLE_RATE as f64)]
    sample_rate: f64,

    /// Min/max decimation factor for the history window
    #[arg(long, default_value_t = 1)]
    decimate: usize,

    /// Backlog in seconds that triggers a lag warning
    #[arg(long, default_value_t = 20.0)]
    lag_threshold: f64,

    #[arg(long)]
    no_watchdog: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let channel = ChannelId::new(args.channel as usize)?;

    let mut config = ReceiverConfig {
        server_addr: args.addr,
        segment_length: args.segment_length,
        layout: ChannelSelection::from_reflect(args.reflect, channel),
        format: if args.raw {
            SampleFormat::Int32
        } else {
            SampleFormat::Float32
        },
        sample_rate: args.sample_rate,
        decimation: args.decimate,
        watchdog: WatchdogConfig {
            enabled: !args.no_watchdog,
            threshold_secs: args.lag_threshold,
            interval: Duration::from_secs(1),
        },
        ..ReceiverConfig::default()
    };
    if !args.no_handshake {
        let mut handshake = Handshake::new(args.experiment, channel);
        handshake.segment_length = Some(args.segment_length);
        handshake.reflect = Some(args.reflect);
        config = config.with_handshake(handshake);
    }

    let ticks_per_second = (config.sample_rate / config.segment_length as f64).round() as u64;
    let values_per_second = if config.decimation > 1 {
        2 * (config.sample_rate as usize / config.decimation)
    } else {
        config.sample_rate as usize
    };
    let mut consumer = LoggingConsumer::new(config.layout, ticks_per_second, values_per_second);

    let receiver = StreamReceiver::connect(config).await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let summary = receiver.run(&mut consumer, &cancel).await?;
    info!(
        "Received {} ticks ({} bytes), {} lag warnings",
        summary.ticks, summary.bytes, summary.lag_warnings
    );
    Ok(())
}
