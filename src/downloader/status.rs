//! 任务状态
//!
//! `StatusState` 是任务状态机对外可见的投影：主阶段 + 暂停/终止三态子状态 +
//! 等待队列信息 + 标志位 + 错误与结果。只能由任务自身修改。

use crate::downloader::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 主阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// 准备中（已创建，尚未申请槽位）
    Preparing,
    /// 等待槽位
    Waiting,
    /// 下载中
    Downloading,
    /// 检查新增片段（仅录像）
    Updating,
    /// 后处理（封装、裁剪、恢复静音）
    Encoding,
    /// 已结束
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Preparing => "preparing",
            Phase::Waiting => "waiting",
            Phase::Downloading => "downloading",
            Phase::Updating => "updating",
            Phase::Encoding => "encoding",
            Phase::Done => "done",
        }
    }

    /// 是否占用并发槽位
    pub fn holds_slot(&self) -> bool {
        matches!(self, Phase::Downloading | Phase::Updating)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 三态标志
///
/// `Processing` 表示请求已受理、工作线程尚未到达安全点
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriState {
    #[default]
    False,
    Processing,
    True,
}

/// 等待队列信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingInfo {
    /// 排队位置（从 1 开始）
    pub position: usize,
    /// 该内容类型的最大并发数
    pub max_slots: usize,
    /// 预计等待时长
    pub estimated_wait: Duration,
}

/// 任务结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// 正常完成
    Completed,
    /// 直播被用户停止，已录制部分保留
    Stopped,
    /// 用户取消
    Canceled,
    /// 失败（`error` 字段记录原因）
    Failed,
}

/// 任务状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusState {
    pub phase: Phase,
    pub pause_state: TriState,
    pub terminate_state: TriState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<WaitingInfo>,
    /// 直播结束时没有录到新数据，但仍执行后处理
    pub download_skipped: bool,
    /// 下载过程中发现了新增片段（仅录像）
    pub update_found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TaskOutcome>,
}

impl Default for StatusState {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Preparing,
            pause_state: TriState::False,
            terminate_state: TriState::False,
            waiting: None,
            download_skipped: false,
            update_found: false,
            error: None,
            outcome: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn is_paused(&self) -> bool {
        self.pause_state == TriState::True
    }

    /// 是否以错误结束
    pub fn has_error(&self) -> bool {
        self.is_terminal() && self.error.is_some()
    }

    /// 切换主阶段（不能进入或离开 `Done`）
    ///
    /// 离开 `Downloading` 时未完成的暂停请求被丢弃；离开 `Waiting` 时清空等待信息
    pub(crate) fn enter(&mut self, phase: Phase) -> bool {
        if self.is_terminal() || phase == Phase::Done || self.phase == phase {
            return false;
        }
        if phase != Phase::Downloading {
            self.pause_state = TriState::False;
        }
        if phase != Phase::Waiting {
            self.waiting = None;
        }
        self.phase = phase;
        true
    }

    /// 进入 `Done`，只生效一次
    pub(crate) fn finish(&mut self, outcome: TaskOutcome, error: Option<ErrorKind>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.phase = Phase::Done;
        self.pause_state = TriState::False;
        self.terminate_state = TriState::True;
        self.waiting = None;
        self.outcome = Some(outcome);
        self.error = match outcome {
            TaskOutcome::Failed => {
                Some(error.unwrap_or_else(|| ErrorKind::UnknownError("未记录失败原因".to_string())))
            }
            _ => None,
        };
        true
    }
}
