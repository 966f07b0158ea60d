//! 事件模块
//!
//! - `types.rs`: 任务事件（状态变更 / 进度更新）
//! - `throttle.rs`: 进度事件节流

mod throttle;
mod types;

pub use throttle::*;
pub use types::*;
