// tick节拍器
//
// 每个tick结束后只睡眠剩余时间。tick起点每次精确前进 tick_rate，
// 误差不会累积；落后超过一个tick时起点直接对齐到当前时刻，不做追赶。

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, StreamError};

/// tick节拍器
#[derive(Debug)]
pub struct TickPacer {
    /// tick周期
    tick_rate: Duration,
    /// 当前tick的起点
    tick_start: Option<Instant>,
    /// 已完成的tick数
    ticks: u64,
}

impl TickPacer {
    /// 创建节拍器
    ///
    /// # 参数
    ///
    /// * `tick_rate` - tick周期（秒），必须大于0
    pub fn new(tick_rate: f64) -> Result<Self> {
        if !(tick_rate > 0.0) || !tick_rate.is_finite() {
            return Err(StreamError::InvalidParameter(format!(
                "tick rate must be positive: {}",
                tick_rate
            )));
        }

        let tick_rate = Duration::from_secs_f64(tick_rate);
        info!("Creating TickPacer: tick_rate={:.3}ms", tick_rate.as_secs_f64() * 1000.0);

        Ok(Self {
            tick_rate,
            tick_start: None,
            ticks: 0,
        })
    }

    pub fn tick_rate(&self) -> Duration {
        self.tick_rate
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// 已经过 `elapsed` 时应睡眠的剩余时间：max(0, tick_rate - elapsed)
    pub fn residual(&self, elapsed: Duration) -> Duration {
        self.tick_rate.saturating_sub(elapsed)
    }

    /// 标记一个tick的开始（首次调用 wait_for_next_tick 前可选）
    pub fn start(&mut self) {
        self.tick_start = Some(Instant::now());
    }

    /// 等待当前tick结束
    ///
    /// 第一次调用时若没有 `start()`，以调用时刻为起点，不睡眠。
    pub async fn wait_for_next_tick(&mut self) {
        self.ticks += 1;

        let tick_start = match self.tick_start {
            Some(start) => start,
            None => {
                self.tick_start = Some(Instant::now());
                return;
            }
        };

        let elapsed = tick_start.elapsed();
        let wait = self.residual(elapsed);

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let next = tick_start + self.tick_rate;
        let now = Instant::now();
        if now.saturating_duration_since(next) > self.tick_rate {
            warn!(
                "Tick {} is late by {:.3}ms, resynchronizing",
                self.ticks,
                now.saturating_duration_since(next).as_secs_f64() * 1000.0
            );
            self.tick_start = Some(now);
        } else {
            debug!(
                "Tick {} slept {:.3}ms (work {:.3}ms)",
                self.ticks,
                wait.as_secs_f64() * 1000.0,
                elapsed.as_secs_f64() * 1000.0
            );
            self.tick_start = Some(next);
        }
    }

    /// 清空起点，下一次等待重新计时
    pub fn reset(&mut self) {
        self.tick_start = None;
        self.ticks = 0;
    }
}
