//! 判题结果轮询
//! 按令牌反复查询判题服务，直到终态、本地截止时间或被取消

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use super::backoff::BackoffPolicy;
use super::judge::{DispatchError, JudgeClient, JudgeStatus, Token};
use crate::models::TerminalResult;

/// 协作式取消令牌
///
/// 克隆后共享同一个取消信号；调用方被销毁时调用 `cancel()`，
/// 正在进行的派发和轮询会在下一个挂起点退出。
#[derive(Clone, Debug)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// 等待取消信号
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // 发送端由令牌自身持有，wait_for 不会因通道关闭而返回错误
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// 轮询状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    Queued,
    Processing,
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "submitted",
            Self::Queued => "in queue",
            Self::Processing => "processing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PollError {
    #[error("judge did not finish within {elapsed:?} (last state: {last_state}{})", describe_last(.last_error))]
    Timeout {
        elapsed: Duration,
        last_state: PollState,
        last_error: Option<DispatchError>,
    },

    #[error("polling cancelled")]
    Cancelled,
}

fn describe_last(last_error: &Option<DispatchError>) -> String {
    match last_error {
        Some(e) => format!(", last error: {}", e),
        None => String::new(),
    }
}

/// 结果轮询器
#[derive(Clone)]
pub struct CompletionPoller {
    judge: Arc<dyn JudgeClient>,
    policy: BackoffPolicy,
}

impl CompletionPoller {
    pub fn new(judge: Arc<dyn JudgeClient>, policy: BackoffPolicy) -> Self {
        Self { judge, policy }
    }

    /// 等待终态结果
    ///
    /// `deadline` 是本地硬截止时间，与远端队列深度无关；超时是预期结果而不是崩溃。
    /// 截止时间内的传输错误会重试，只在超时时附带最后一次错误。
    pub async fn await_result(
        &self,
        token: &Token,
        deadline: Duration,
        cancel: &CancelToken,
    ) -> Result<TerminalResult, PollError> {
        let schedule = self.policy.with_deadline(deadline);
        let started = Instant::now();
        let mut state = PollState::Submitted;
        let mut last_error: Option<DispatchError> = None;
        let mut attempt = 0u32;

        let timed_out = |state: PollState, last_error: Option<DispatchError>| PollError::Timeout {
            elapsed: started.elapsed(),
            last_state: state,
            last_error,
        };

        loop {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }

            let remaining = match deadline.checked_sub(started.elapsed()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return Err(timed_out(state, last_error)),
            };

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                fetched = tokio::time::timeout(remaining, self.judge.fetch(token)) => fetched,
            };

            match fetched {
                Err(_) => return Err(timed_out(state, last_error)),
                Ok(Ok(JudgeStatus::Terminal(result))) => {
                    debug!(
                        "Token {} finished as {} after {} polls",
                        token,
                        result.description,
                        attempt + 1
                    );
                    return Ok(result);
                }
                Ok(Ok(JudgeStatus::Queued)) => {
                    state = PollState::Queued;
                    last_error = None;
                }
                Ok(Ok(JudgeStatus::Processing)) => {
                    state = PollState::Processing;
                    last_error = None;
                }
                Ok(Err(e)) => {
                    warn!("Poll {} for token {} failed: {}", attempt + 1, token, e);
                    last_error = Some(e);
                }
            }

            let delay = match schedule.next_delay(attempt, started.elapsed()) {
                Some(delay) => delay,
                None => return Err(timed_out(state, last_error)),
            };
            attempt += 1;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
