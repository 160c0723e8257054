use std::{
    thread,
    time::{Duration, Instant},
};

use log::debug;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("Polling timed out after {attempts} attempts ({elapsed:?})")]
    Timeout { attempts: usize, elapsed: Duration },
}

/// 固定間隔的輪詢設定，並以 `timeout` 作為最長等待時間。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    /// 授權輪詢：每秒一次，最多兩分鐘。
    pub const AUTHORIZATION: PollPolicy = PollPolicy {
        interval: Duration::from_secs(1),
        timeout: Duration::from_secs(120),
    };
    /// 訂單輪詢：每五秒一次，最多五分鐘。
    pub const ORDER: PollPolicy = PollPolicy {
        interval: Duration::from_secs(5),
        timeout: Duration::from_secs(300),
    };

    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// 反覆呼叫 `fetch`，直到 `done` 對結果回傳 `true`。
    ///
    /// 每次呼叫前先等待 `interval`；`fetch` 的錯誤會直接回傳，不會重試。
    /// 超過 `timeout` 仍未完成時回傳 `PollError::Timeout`（經 `From` 轉為 `E`）。
    pub fn run<T, E, F, D>(&self, mut fetch: F, done: D) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        D: Fn(&T) -> bool,
        E: From<PollError>,
    {
        let started = Instant::now();
        let mut attempts = 0;
        loop {
            if attempts > 0 && started.elapsed() >= self.timeout {
                return Err(PollError::Timeout {
                    attempts,
                    elapsed: started.elapsed(),
                }
                .into());
            }

            thread::sleep(self.interval);
            attempts += 1;
            let value = fetch()?;
            if done(&value) {
                debug!("polling finished after {} attempts", attempts);
                return Ok(value);
            }
        }
    }
}
