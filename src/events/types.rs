//! 任务事件类型
//!
//! 每个订阅者拥有独立的有序通道；状态事件从不合并或重排，进度事件可被节流

use crate::downloader::{Phase, ProgressState, StatusState};
use serde::{Deserialize, Serialize};

/// 事件优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// 进度更新
    Low = 0,
    /// 阶段或子状态变更
    Medium = 1,
    /// 任务结束
    High = 2,
}

/// 任务事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// 状态变更（携带完整快照）
    Status { task_id: String, status: StatusState },
    /// 进度更新
    Progress {
        task_id: String,
        progress: ProgressState,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            TaskEvent::Status { task_id, .. } => task_id,
            TaskEvent::Progress { task_id, .. } => task_id,
        }
    }

    pub fn priority(&self) -> EventPriority {
        match self {
            TaskEvent::Status { status, .. } if status.is_terminal() => EventPriority::High,
            TaskEvent::Status { .. } => EventPriority::Medium,
            TaskEvent::Progress { .. } => EventPriority::Low,
        }
    }

    pub fn event_type_name(&self) -> &'static str {
        match self {
            TaskEvent::Status { .. } => "status",
            TaskEvent::Progress { .. } => "progress",
        }
    }

    /// 状态事件中的阶段
    pub fn phase(&self) -> Option<Phase> {
        match self {
            TaskEvent::Status { status, .. } => Some(status.phase),
            TaskEvent::Progress { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskEvent::Status { status, .. } if status.is_terminal())
    }
}
