use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use common::ChannelId;
use std::net::SocketAddr;
use std::path::PathBuf;
use stream_server::config::{DEFAULT_DAQ_DATA_PORT, DEFAULT_DAQ_HOST, DEFAULT_DAQ_HTTP_PORT, DEFAULT_SERVER_PORT};
use stream_server::{DaqConfig, DatasetCatalog, InstrumentClient, ServerConfig, SourceMode, StreamServer};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// MEA stream server - serves recorded or live 60-channel sample streams over TCP
#[derive(Parser)]
#[command(name = "stream-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    daq: DaqArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stream server (default)
    Serve(ServeArgs),

    /// Send stimulation commands to the remote instrument
    Stim(StimArgs),

    /// List experiments available for playback
    Experiments {
        /// Directory containing recordings
        #[arg(long, default_value = "mea_data")]
        dataset_dir: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct DaqArgs {
    /// Remote instrument host
    #[arg(long, env = "MEA_DAQ_HOST", default_value = DEFAULT_DAQ_HOST)]
    daq_host: String,

    /// Remote instrument HTTP port
    #[arg(long, env = "MEA_DAQ_HTTP_PORT", default_value_t = DEFAULT_DAQ_HTTP_PORT)]
    daq_http_port: u16,

    /// Remote instrument data port
    #[arg(long, env = "MEA_DAQ_DATA_PORT", default_value_t = DEFAULT_DAQ_DATA_PORT)]
    daq_data_port: u16,
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Acquire live data from the remote DAQ
    #[arg(long, conflicts_with = "sawtooth")]
    live: bool,

    /// Serve playback directly without a handshake
    #[arg(long)]
    auto_setup: bool,

    /// Forward all channels instead of one selected channel
    #[arg(long)]
    reflect: bool,

    /// Generate a sawtooth test signal
    #[arg(long)]
    sawtooth: bool,

    /// Connect to a local DAQ simulator, no instrument setup
    #[arg(long)]
    connect_mock: bool,

    /// Default channel (0-59)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..60))]
    channel: Option<u8>,

    /// Listening port
    #[arg(short, long, env = "MEA_SERVER_PORT", default_value_t = DEFAULT_SERVER_PORT)]
    port: u16,

    /// Directory containing recordings
    #[arg(long, default_value = "mea_data")]
    dataset_dir: PathBuf,

    /// Recording served as the "default" experiment
    #[arg(long)]
    default_dataset: Option<PathBuf>,

    /// Samples per segment for playback
    #[arg(long)]
    segment_length: Option<usize>,

    /// Also stream the default channel to this consumer address
    #[arg(long)]
    forward_to: Option<SocketAddr>,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct StimArgs {
    /// Setup DSP for MEA stimuli
    #[arg(long)]
    setup: bool,

    /// Start stimulation
    #[arg(long)]
    start: bool,

    /// Stop stimulation
    #[arg(long)]
    stop: bool,

    /// Send a debug request, printed in the instrument console
    #[arg(long)]
    debug: bool,
}

impl DaqArgs {
    fn into_config(self, mock: bool) -> DaqConfig {
        let base = if mock { DaqConfig::mock() } else { DaqConfig::default() };
        DaqConfig {
            host: if mock { base.host } else { self.daq_host },
            http_port: self.daq_http_port,
            data_port: self.daq_data_port,
            ..base
        }
    }
}

impl ServeArgs {
    fn into_config(self, daq: DaqArgs) -> Result<ServerConfig> {
        let mode = if self.live {
            SourceMode::Live
        } else if self.sawtooth {
            SourceMode::Sawtooth
        } else {
            SourceMode::Playback
        };

        let default_channel = match self.channel {
            Some(channel) => Some(ChannelId::new(channel as usize)?),
            None => None,
        };

        let defaults = ServerConfig::default();
        Ok(ServerConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], self.port)),
            mode,
            auto_setup: self.auto_setup,
            reflect: self.reflect,
            default_channel,
            segment_length: self.segment_length.unwrap_or(defaults.segment_length),
            dataset_root: self.dataset_dir,
            default_dataset: self.default_dataset,
            daq: daq.into_config(self.connect_mock),
            ..defaults
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        None => serve(ServeArgs::parse_from(["serve"]), cli.daq).await,
        Some(Commands::Serve(args)) => serve(args, cli.daq).await,
        Some(Commands::Stim(args)) => stim(args, cli.daq).await,
        Some(Commands::Experiments { dataset_dir, json }) => {
            let catalog = DatasetCatalog::new(dataset_dir, None, 0.0);
            let experiments = catalog.list();
            if json {
                println!("{}", serde_json::to_string_pretty(&experiments)?);
            } else {
                for experiment in experiments {
                    println!(
                        "{}\t{} bytes\t{}",
                        experiment.name,
                        experiment.file_size,
                        experiment.path.display()
                    );
                }
            }
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs, daq: DaqArgs) -> Result<()> {
    info!("🚀 Stream server starting...");

    let forward_to = args.forward_to;
    let config = args.into_config(daq)?;
    info!("✓ Configuration loaded ({:?} mode)", config.mode);

    let server = StreamServer::bind(config).await?;
    let handle = server.handle();

    // Ctrl-C 取消服务令牌
    let shutdown = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown request detected, shutting down gracefully");
                shutdown.shutdown();
            }
            Err(e) => error!("Could not listen for Ctrl-C: {}", e),
        }
    });

    // 会话结果只记录失败
    let mut reports = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match reports.recv().await {
                Ok(report) => {
                    if let Err(e) = report.outcome {
                        warn!("Session {} ({}) ended with error: {}", report.session_id, report.peer, e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Missed {} session reports", skipped)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if let Some(addr) = forward_to {
        let forwarder = handle.clone();
        let channel = handle.config().initial_channel();
        tokio::spawn(async move {
            if let Err(e) = forwarder.forward_channel(addr, channel).await {
                error!("Forwarding to {} failed: {}", addr, e);
            }
        });
    }

    info!("✅ Stream server ready on {}", server.local_addr());
    server.run().await?;
    Ok(())
}

async fn stim(args: StimArgs, daq: DaqArgs) -> Result<()> {
    let client = InstrumentClient::new(&daq.into_config(false));

    let ok = if args.setup {
        client.setup_stim().await
    } else if args.start {
        client.enable_stim().await
    } else if args.stop {
        client.disable_stim().await
    } else {
        client.debug_dsp().await
    };

    if !ok {
        warn!("Instrument request failed (see log above)");
    }
    Ok(())
}
