// 直采数据源对接模拟仪器

use crate::{MockDaq, SimulatorConfig};
use common::{ChannelId, Dataset, CHANNEL_COUNT};
use std::time::Duration;
use stream_server::streaming::{LiveSource, StreamSource};
use stream_server::DaqConfig;
use tokio_util::sync::CancellationToken;

async fn start_daq(dataset: Dataset, segment_length: usize) -> (DaqConfig, CancellationToken) {
    let config = SimulatorConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        seconds: 1.0,
        segment_length,
        ..SimulatorConfig::default()
    };
    let daq = MockDaq::new(config, dataset).await.unwrap();
    let port = daq.local_addr().unwrap().port();
    let cancel = CancellationToken::new();
    tokio::spawn(daq.run(cancel.clone()));

    let daq_config = DaqConfig {
        data_port: port,
        segment_length,
        ..DaqConfig::mock()
    };
    (daq_config, cancel)
}

#[tokio::test]
async fn test_live_source_demultiplexes_simulator() {
    let dataset = Dataset::synthetic(10_000.0, 10_000);
    let (daq_config, cancel) = start_daq(dataset.clone(), 100).await;

    let mut source = LiveSource::connect(&daq_config, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(source.paced_by_upstream());

    // 只请求一个通道，其余59个在 end_tick 中被读掉
    let channel = ChannelId::new(31).unwrap();
    for tick in 0..3 {
        let segment = source.segment(channel).await.unwrap();
        let expected = &dataset.channel(channel)[tick * 100..(tick + 1) * 100];
        for (actual, expected) in segment.samples.iter().zip(expected) {
            assert!((actual - expected).abs() <= 1e-7);
        }
        source.end_tick().await.unwrap();
    }

    source.close().await;
    cancel.cancel();
}

#[tokio::test]
async fn test_live_source_reflects_every_channel() {
    let dataset = Dataset::synthetic(10_000.0, 10_000);
    let (daq_config, cancel) = start_daq(dataset.clone(), 50).await;

    let mut source = LiveSource::connect(&daq_config, Duration::from_secs(5))
        .await
        .unwrap();

    let mut count = 0;
    for channel in ChannelId::all() {
        let segment = source.segment(channel).await.unwrap();
        assert_eq!(segment.len(), 50);
        let expected = &dataset.channel(channel)[0..50];
        assert!((segment.samples[49] - expected[49]).abs() <= 1e-7);
        count += 1;
    }
    source.end_tick().await.unwrap();
    assert_eq!(count, CHANNEL_COUNT);

    source.close().await;
    cancel.cancel();
}
