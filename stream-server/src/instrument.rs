// 远程采集仪器控制客户端
//
// 简单的HTTP请求/响应调用。只有200算成功，其他状态或网络错误只记录日志并返回 false，
// 调用方在缺少该功能的情况下继续运行。模拟模式下不发出任何请求。

use common::DaqConnectRequest;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{error, info};

use crate::config::DaqConfig;

#[derive(Clone, Debug)]
pub struct InstrumentClient {
    http: reqwest::Client,
    base_url: String,
    mock: bool,
    settle_delay: Duration,
}

impl InstrumentClient {
    pub fn new(config: &DaqConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                error!("HTTP client error, falling back to defaults: {}", e);
                reqwest::Client::new()
            });

        Self {
            http,
            base_url: config.base_url(),
            mock: config.mock,
            settle_delay: config.settle_delay,
        }
    }

    pub fn is_mock(&self) -> bool {
        self.mock
    }

    fn url(&self, resource: &str) -> String {
        format!("{}{}", self.base_url, resource)
    }

    async fn simple_get(&self, resource: &str) -> bool {
        if self.mock {
            return true;
        }

        match self.http.get(self.url(resource)).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                info!("Successful GET request to {}", resource);
                true
            }
            Ok(resp) => {
                error!("GET request to {} returned {}", resource, resp.status());
                false
            }
            Err(e) => {
                error!("Could not reach remote instrument at {}: {}", self.base_url, e);
                false
            }
        }
    }

    /// 配置并启动采集：POST /DAQ/connect，GET /DAQ/start，然后等待仪器就绪
    pub async fn initialize_daq(&self, sample_rate: u32, segment_length: usize) -> bool {
        if self.mock {
            return true;
        }

        let body = DaqConnectRequest {
            samplerate: sample_rate,
            segment_length,
        };

        match self.http.post(self.url("/DAQ/connect")).json(&body).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                info!("Remote DAQ configured: {} Hz, segment_length={}", sample_rate, segment_length);
            }
            Ok(resp) => {
                error!("DAQ connect rejected with {} (malformed request?)", resp.status());
                return false;
            }
            Err(e) => {
                error!("Could not reach remote instrument at {}: {}", self.base_url, e);
                return false;
            }
        }

        if !self.simple_get("/DAQ/start").await {
            error!("Could not start remote DAQ");
            return false;
        }

        tokio::time::sleep(self.settle_delay).await;
        true
    }

    pub async fn stop_daq(&self) -> bool {
        self.simple_get("/DAQ/stop").await
    }

    pub async fn setup_stim(&self) -> bool {
        self.simple_get("/DSP/stim/setup").await
    }

    pub async fn enable_stim(&self) -> bool {
        self.simple_get("/DSP/stim/start").await
    }

    pub async fn disable_stim(&self) -> bool {
        self.simple_get("/DSP/stim/stop").await
    }

    /// 让仪器在自己的控制台打印调试信息
    pub async fn debug_dsp(&self) -> bool {
        self.simple_get("/DSP/stim/debug").await
    }
}
