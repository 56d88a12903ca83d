//! 刷题判题流水线
//!
//! 把用户代码提交给远端判题服务，逐个测试用例校验输出，
//! 通过后在 SQLite 中记录用户的积分、徽章、连续打卡与经验值。

pub mod commands;
pub mod models;
pub mod services;
pub mod utils;

pub use commands::AppState;
pub use services::{CancelToken, GradeOutcome, GradingService};
pub use utils::{init_logging, GraderConfig};
