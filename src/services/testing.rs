//! 测试用判题服务替身

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::judge::{DispatchError, JudgeClient, JudgeStatus, Token};
use crate::models::{StatusKind, TerminalResult};

/// 一次提交的脚本化行为
#[derive(Debug, Clone)]
pub enum Script {
    /// 排队一次后以 Accepted 结束，stdout 末尾带换行
    Output(String),
    /// 以指定状态结束
    Status(StatusKind, String),
    /// 永远处于 Processing
    Stuck,
    /// 查询请求永不返回
    Hang,
    /// 前若干次查询失败，随后成功
    FlakyThenOutput { failures: usize, stdout: String },
    /// 派发失败
    Unreachable,
}

struct Pending {
    script: Script,
    fetches: usize,
}

type Program = Box<dyn Fn(&str, &str) -> Script + Send + Sync>;

/// 按 (源码, stdin) 决定行为的判题服务
pub struct FakeJudge {
    program: Program,
    pending: Mutex<HashMap<String, Pending>>,
    next_id: AtomicUsize,
    submits: AtomicUsize,
}

impl FakeJudge {
    pub fn new(program: impl Fn(&str, &str) -> Script + Send + Sync + 'static) -> Self {
        Self {
            program: Box::new(program),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            submits: AtomicUsize::new(0),
        }
    }

    /// 一个极简"解释器"：SUM 对输入求和，ECHO 原样输出，其余按脚本名处理
    pub fn interpreter() -> Self {
        Self::new(|source, stdin| match source.trim() {
            "SUM" => {
                let total: i64 = stdin
                    .split_whitespace()
                    .filter_map(|n| n.parse::<i64>().ok())
                    .sum();
                Script::Output(total.to_string())
            }
            "ECHO" => Script::Output(stdin.trim().to_string()),
            "LOOP" => Script::Stuck,
            "CRASH" => Script::Status(StatusKind::RuntimeError, "Traceback".to_string()),
            "OFFLINE" => Script::Unreachable,
            _ => Script::Status(StatusKind::CompileError, "SyntaxError".to_string()),
        })
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self, token: &Token) -> usize {
        self.pending
            .lock()
            .unwrap()
            .get(token.as_str())
            .map(|p| p.fetches)
            .unwrap_or(0)
    }

    fn terminal(status: StatusKind, stdout: String, stderr: String) -> JudgeStatus {
        JudgeStatus::Terminal(TerminalResult {
            status,
            description: status.as_str().to_string(),
            stdout,
            stderr,
            compile_output: None,
            time_seconds: Some(0.01),
            memory_kb: Some(2048),
        })
    }
}

#[async_trait]
impl JudgeClient for FakeJudge {
    async fn submit(
        &self,
        source_code: &str,
        _language_id: u32,
        stdin: &str,
    ) -> Result<Token, DispatchError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        let script = (self.program)(source_code, stdin);
        if matches!(script, Script::Unreachable) {
            return Err(DispatchError::Network("connection refused".to_string()));
        }

        let id = format!("tok-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.pending
            .lock()
            .unwrap()
            .insert(id.clone(), Pending { script, fetches: 0 });
        Ok(Token::new(id))
    }

    async fn fetch(&self, token: &Token) -> Result<JudgeStatus, DispatchError> {
        let (script, fetches) = {
            let mut pending = self.pending.lock().unwrap();
            let entry = pending
                .get_mut(token.as_str())
                .ok_or_else(|| DispatchError::MalformedResponse("unknown token".to_string()))?;
            entry.fetches += 1;
            (entry.script.clone(), entry.fetches)
        };

        match script {
            Script::Output(stdout) => {
                if fetches == 1 {
                    Ok(JudgeStatus::Queued)
                } else {
                    Ok(Self::terminal(StatusKind::Accepted, format!("{}\n", stdout), String::new()))
                }
            }
            Script::Status(status, stderr) => Ok(Self::terminal(status, String::new(), stderr)),
            Script::Stuck => {
                if fetches == 1 {
                    Ok(JudgeStatus::Queued)
                } else {
                    Ok(JudgeStatus::Processing)
                }
            }
            Script::Hang => std::future::pending().await,
            Script::FlakyThenOutput { failures, stdout } => {
                if fetches <= failures {
                    Err(DispatchError::Network("502 bad gateway".to_string()))
                } else {
                    Ok(Self::terminal(StatusKind::Accepted, format!("{}\n", stdout), String::new()))
                }
            }
            Script::Unreachable => Err(DispatchError::Network("connection refused".to_string())),
        }
    }
}
