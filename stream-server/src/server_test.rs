// 服务端场景测试：真实TCP连接，本机回环

use crate::config::{DaqConfig, ServerConfig, SourceMode};
use crate::tcp::{ServerHandle, SessionReport, StreamServer};
use common::recording::write_recording;
use common::{codec, ChannelId, Dataset, SampleFormat, StreamError, CHANNEL_COUNT};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        synthetic_seconds: 1.0,
        io_timeout: WAIT,
        ..ServerConfig::default()
    }
}

async fn start(config: ServerConfig) -> (ServerHandle, JoinHandle<common::Result<()>>) {
    let server = StreamServer::bind(config).await.unwrap();
    let handle = server.handle();
    let task = tokio::spawn(server.run());
    (handle, task)
}

async fn read_floats(stream: &mut TcpStream, samples: usize) -> Vec<f32> {
    let mut buf = vec![0u8; samples * 4];
    timeout(WAIT, stream.read_exact(&mut buf)).await.unwrap().unwrap();
    codec::decode(&buf, SampleFormat::Float32).unwrap()
}

async fn next_report(reports: &mut broadcast::Receiver<SessionReport>) -> SessionReport {
    timeout(WAIT, reports.recv()).await.unwrap().unwrap()
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_auto_setup_streams_selected_channel() {
    let config = ServerConfig {
        auto_setup: true,
        default_channel: Some(ChannelId::new(5).unwrap()),
        ..test_config()
    };
    let (handle, _task) = start(config).await;
    let dataset = handle.catalog().load("default").await.unwrap();
    let five = ChannelId::new(5).unwrap();

    let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();

    // 一个tick恰好400字节：通道5的前100个采样
    assert_eq!(read_floats(&mut client, 100).await, dataset.channel(five)[0..100]);
    assert_eq!(read_floats(&mut client, 100).await, dataset.channel(five)[100..200]);

    handle.shutdown();
}

#[tokio::test]
async fn test_handshake_missing_channel_disconnects() {
    let (handle, _task) = start(test_config()).await;
    let mut reports = handle.subscribe();

    let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
    client.write_all(br#"{"experiment":"default"}"#).await.unwrap();

    let mut received = Vec::new();
    timeout(WAIT, client.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    // 协议没有错误响应：直接断开，不发送任何数据
    assert!(received.is_empty());

    let report = next_report(&mut reports).await;
    assert!(matches!(report.outcome, Err(StreamError::MalformedHandshake(_))));

    handle.shutdown();
}

#[tokio::test]
async fn test_handshake_selects_experiment_and_channel() {
    let dir = tempfile::TempDir::new().unwrap();
    let dataset = Dataset::synthetic(10_000.0, 2_000);
    write_recording(&dir.path().join("rat-1.mear"), &dataset).unwrap();

    let config = ServerConfig {
        dataset_root: dir.path().to_path_buf(),
        ..test_config()
    };
    let (handle, _task) = start(config).await;

    let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
    client
        .write_all(br#"{"experiment": "rat-1", "channel": 12, "segment_length": 50}"#)
        .await
        .unwrap();

    let twelve = ChannelId::new(12).unwrap();
    assert_eq!(read_floats(&mut client, 50).await, dataset.channel(twelve)[0..50]);
    assert_eq!(read_floats(&mut client, 50).await, dataset.channel(twelve)[50..100]);

    handle.shutdown();
}

#[tokio::test]
async fn test_unknown_experiment_closes_session() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = ServerConfig {
        dataset_root: dir.path().to_path_buf(),
        ..test_config()
    };
    let (handle, _task) = start(config).await;
    let mut reports = handle.subscribe();

    let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
    client
        .write_all(br#"{"experiment": "missing", "channel": 1}"#)
        .await
        .unwrap();

    let report = next_report(&mut reports).await;
    assert!(matches!(report.outcome, Err(StreamError::Dataset(_))));
    handle.shutdown();
}

#[tokio::test]
async fn test_unresponsive_live_source_is_reported() {
    let config = ServerConfig {
        mode: SourceMode::Live,
        daq: DaqConfig {
            data_port: closed_port(),
            ..DaqConfig::mock()
        },
        ..test_config()
    };
    let (handle, task) = start(config).await;
    let mut reports = handle.subscribe();

    let first = TcpStream::connect(handle.local_addr()).await.unwrap();
    let report = next_report(&mut reports).await;
    assert!(matches!(
        report.outcome,
        Err(StreamError::UnresponsiveSource { .. })
    ));

    // 监听端口仍然可用，之后的独立会话照常被接受
    let second = TcpStream::connect(handle.local_addr()).await.unwrap();
    let another = next_report(&mut reports).await;
    assert_ne!(another.session_id, report.session_id);
    assert_eq!(another.peer, second.local_addr().unwrap());
    assert!(!task.is_finished());

    drop(first);
    handle.shutdown();
}

#[tokio::test]
async fn test_reflect_forwards_all_channels() {
    let (handle, _task) = start(test_config()).await;
    let dataset = handle.catalog().load("default").await.unwrap();

    // reflect=true：每个tick 60 个分片
    let mut reflect = TcpStream::connect(handle.local_addr()).await.unwrap();
    reflect
        .write_all(br#"{"experiment":"default","channel":7,"reflect":true}"#)
        .await
        .unwrap();
    let tick = read_floats(&mut reflect, 100 * CHANNEL_COUNT).await;
    for channel in ChannelId::all() {
        let start = channel.index() * 100;
        assert_eq!(tick[start..start + 100], dataset.channel(channel)[0..100]);
    }

    // reflect=false：每个tick 1 个分片
    let mut single = TcpStream::connect(handle.local_addr()).await.unwrap();
    single
        .write_all(br#"{"experiment":"default","channel":7}"#)
        .await
        .unwrap();
    let seven = ChannelId::new(7).unwrap();
    assert_eq!(read_floats(&mut single, 100).await, dataset.channel(seven)[0..100]);
    assert_eq!(read_floats(&mut single, 100).await, dataset.channel(seven)[100..200]);

    handle.shutdown();
}

#[tokio::test]
async fn test_change_channel_resets_playback() {
    let config = ServerConfig {
        auto_setup: true,
        ..test_config()
    };
    let (handle, _task) = start(config).await;
    let dataset = handle.catalog().load("default").await.unwrap();

    let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
    read_floats(&mut client, 100).await;

    let sessions = handle.active_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].channel, ChannelId::FIRST);

    let nine = ChannelId::new(9).unwrap();
    handle.change_channel(sessions[0].session_id, nine).unwrap();
    assert_eq!(handle.active_sessions()[0].channel, nine);

    let expected = dataset.channel(nine)[0..100].to_vec();
    let mut switched = false;
    for _ in 0..20 {
        if read_floats(&mut client, 100).await == expected {
            switched = true;
            break;
        }
    }
    assert!(switched);

    assert!(handle
        .change_channel(uuid::Uuid::new_v4(), nine)
        .is_err());
    handle.shutdown();
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let config = ServerConfig {
        auto_setup: true,
        ..test_config()
    };
    let (handle, task) = start(config).await;
    let mut reports = handle.subscribe();

    let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
    read_floats(&mut client, 100).await;

    handle.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();

    let report = next_report(&mut reports).await;
    let summary = report.outcome.unwrap();
    assert!(summary.cancelled);
    assert!(summary.ticks >= 1);
    assert!(handle.active_sessions().is_empty());

    // 剩余数据全部是完整分片，随后是EOF
    let mut rest = Vec::new();
    timeout(WAIT, client.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert_eq!(rest.len() % 400, 0);

    // 监听端口已关闭
    assert!(TcpStream::connect(handle.local_addr()).await.is_err());
}

#[tokio::test]
async fn test_stop_single_session() {
    let config = ServerConfig {
        auto_setup: true,
        ..test_config()
    };
    let (handle, task) = start(config).await;
    let mut reports = handle.subscribe();

    let mut first = TcpStream::connect(handle.local_addr()).await.unwrap();
    let mut second = TcpStream::connect(handle.local_addr()).await.unwrap();
    read_floats(&mut first, 100).await;
    read_floats(&mut second, 100).await;

    let target = handle
        .active_sessions()
        .into_iter()
        .find(|s| s.peer == first.local_addr().unwrap())
        .unwrap();
    assert!(handle.stop_session(target.session_id));

    let report = next_report(&mut reports).await;
    assert_eq!(report.session_id, target.session_id);

    // 另一个会话不受影响
    read_floats(&mut second, 100).await;
    assert_eq!(handle.active_sessions().len(), 1);
    assert!(!task.is_finished());
    handle.shutdown();
}

#[tokio::test]
async fn test_forward_channel_to_remote_consumer() {
    let (handle, _task) = start(test_config()).await;
    let dataset = handle.catalog().load("default").await.unwrap();

    let consumer = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = consumer.local_addr().unwrap();

    let forwarder = handle.clone();
    let three = ChannelId::new(3).unwrap();
    let forward = tokio::spawn(async move { forwarder.forward_channel(addr, three).await });

    let (mut socket, _) = timeout(WAIT, consumer.accept()).await.unwrap().unwrap();
    assert_eq!(read_floats(&mut socket, 100).await, dataset.channel(three)[0..100]);

    drop(socket);
    let result = timeout(WAIT, forward).await.unwrap().unwrap();
    assert!(result.unwrap_err().is_disconnect());
}

#[tokio::test]
async fn test_forward_channel_refused() {
    let (handle, _task) = start(test_config()).await;
    let addr: SocketAddr = format!("127.0.0.1:{}", closed_port()).parse().unwrap();
    let result = handle.forward_channel(addr, ChannelId::FIRST).await;
    assert!(matches!(result, Err(StreamError::UnresponsiveSource { .. })));
}

#[tokio::test]
async fn test_bind_failure_is_fatal() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ServerConfig {
        bind_addr: taken.local_addr().unwrap(),
        ..test_config()
    };
    assert!(matches!(
        StreamServer::bind(config).await,
        Err(StreamError::Bind { .. })
    ));
}
