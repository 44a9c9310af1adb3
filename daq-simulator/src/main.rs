use anyhow::{Context, Result};
use clap::Parser;
use common::{Dataset, RawRecordingReader, RecordingReader, DEFAULT_SAMPLE_RATE};
use daq_simulator::config::{DEFAULT_DATA_PORT, DEFAULT_RETAINED_SECONDS};
use daq_simulator::{MockDaq, SimulatorConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 模拟采集仪器：以int32多路复用格式循环发送数据集
#[derive(Parser, Debug)]
#[command(name = "daq-simulator", version)]
struct Args {
    /// 数据端口
    #[arg(long, env = "MEA_DAQ_DATA_PORT", default_value_t = DEFAULT_DATA_PORT)]
    port: u16,

    /// 录制文件；不指定时发送合成数据
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// 循环发送的数据时长（秒）
    #[arg(long, default_value_t = DEFAULT_RETAINED_SECONDS)]
    seconds: f64,

    #[arg(long, default_value_t = common::LIVE_SEGMENT_LENGTH)]
    segment_length: usize,
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
    info!("DAQ simulator starting...");

    let dataset = match &args.dataset {
        Some(path) => RawRecordingReader::new()
            .read_dataset(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            info!("No dataset given, generating {:.1}s of synthetic data", args.seconds);
            let samples = (args.seconds * DEFAULT_SAMPLE_RATE as f64) as usize;
            Dataset::synthetic(DEFAULT_SAMPLE_RATE as f64, samples)
        }
    };

    let config = SimulatorConfig {
        bind_addr: SocketAddr::from(([0, 0, 0, 0], args.port)),
        seconds: args.seconds,
        segment_length: args.segment_length,
        ..SimulatorConfig::default()
    };
    let daq = MockDaq::new(config, dataset).await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping");
            ctrl_c.cancel();
        }
    });

    daq.run(cancel).await?;
    Ok(())
}
