//! 下载任务句柄
//!
//! `DownloadTask` 是可克隆的句柄，状态由任务自己的工作协程修改，外部只能读取快照或发出命令。
//! 所有状态变更都在任务锁内完成并按顺序推送给订阅者。

use crate::downloader::error::{EngineError, EngineResult, ErrorKind, RestrictedContent};
use crate::downloader::info::{ContentType, DownloadInfo};
use crate::downloader::progress::ProgressState;
use crate::downloader::status::{Phase, StatusState, TaskOutcome, TriState, WaitingInfo};
use crate::events::{ProgressThrottler, TaskEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 任务快照
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub info: DownloadInfo,
    pub created_at: DateTime<Utc>,
    pub status: StatusState,
    pub progress: ProgressState,
}

struct TaskInner {
    status: StatusState,
    progress: ProgressState,
    subscribers: Vec<mpsc::UnboundedSender<TaskEvent>>,
}

/// 任务共享状态
pub(crate) struct TaskShared {
    pub(crate) id: String,
    pub(crate) info: DownloadInfo,
    /// 进入准备阶段的序号（决定排队顺序）
    pub(crate) seq: u64,
    pub(crate) created_at: DateTime<Utc>,
    inner: Mutex<TaskInner>,
    /// 取消（丢弃数据）
    pub(crate) cancel: CancellationToken,
    /// 停止录制（直播，保留已录制数据）
    pub(crate) stop: CancellationToken,
    pause_tx: watch::Sender<bool>,
    restriction: Mutex<Option<RestrictedContent>>,
    throttler: ProgressThrottler,
    done_tx: watch::Sender<bool>,
}

impl TaskShared {
    pub(crate) fn new(id: String, info: DownloadInfo, seq: u64, throttle: Duration) -> Arc<Self> {
        let progress = ProgressState::initial(info.content_type());
        Arc::new(Self {
            id,
            info,
            seq,
            created_at: Utc::now(),
            inner: Mutex::new(TaskInner {
                status: StatusState::new(),
                progress,
                subscribers: Vec::new(),
            }),
            cancel: CancellationToken::new(),
            stop: CancellationToken::new(),
            pause_tx: watch::channel(false).0,
            restriction: Mutex::new(None),
            throttler: ProgressThrottler::new(throttle),
            done_tx: watch::channel(false).0,
        })
    }

    pub(crate) fn content_type(&self) -> ContentType {
        self.info.content_type()
    }

    fn broadcast(inner: &mut TaskInner, event: TaskEvent) {
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn emit_status(&self, inner: &mut TaskInner) {
        let event = TaskEvent::Status {
            task_id: self.id.clone(),
            status: inner.status.clone(),
        };
        Self::broadcast(inner, event);
    }

    fn emit_progress(&self, inner: &mut TaskInner) {
        let event = TaskEvent::Progress {
            task_id: self.id.clone(),
            progress: inner.progress.clone(),
        };
        Self::broadcast(inner, event);
    }

    pub(crate) fn status(&self) -> StatusState {
        self.inner.lock().status.clone()
    }

    pub(crate) fn phase(&self) -> Phase {
        self.inner.lock().status.phase
    }

    pub(crate) fn progress(&self) -> ProgressState {
        self.inner.lock().progress.clone()
    }

    // ==================== 工作协程调用 ====================

    /// 切换阶段；离开下载阶段时丢弃未完成的暂停请求
    pub(crate) fn enter_phase(&self, phase: Phase) -> bool {
        let mut inner = self.inner.lock();
        let from = inner.status.phase;
        if !inner.status.enter(phase) {
            return false;
        }
        if phase != Phase::Downloading {
            self.pause_tx.send_replace(false);
        }
        // 阶段切换前先推送最后一次进度
        self.throttler.force_emit();
        self.emit_progress(&mut inner);
        self.emit_status(&mut inner);
        drop(inner);

        info!("任务阶段变更: {} {} -> {}", self.id, from, phase);
        true
    }

    /// 更新排队信息（只在 `Waiting` 且发生变化时推送）
    pub(crate) fn set_waiting(&self, waiting: Option<WaitingInfo>) {
        let mut inner = self.inner.lock();
        if inner.status.phase != Phase::Waiting || inner.status.waiting == waiting {
            return;
        }
        inner.status.waiting = waiting;
        self.emit_status(&mut inner);
    }

    pub(crate) fn mark_download_skipped(&self) {
        let mut inner = self.inner.lock();
        if inner.status.is_terminal() || inner.status.download_skipped {
            return;
        }
        inner.status.download_skipped = true;
        self.emit_status(&mut inner);
    }

    pub(crate) fn mark_update_found(&self) {
        let mut inner = self.inner.lock();
        if inner.status.is_terminal() || inner.status.update_found {
            return;
        }
        inner.status.update_found = true;
        self.emit_status(&mut inner);
    }

    /// 更新进度；`force` 为 false 时受节流控制
    pub(crate) fn update_progress(&self, progress: ProgressState, force: bool) {
        let mut inner = self.inner.lock();
        if inner.status.is_terminal() {
            return;
        }
        inner.progress = progress;
        let emit = if force {
            self.throttler.force_emit()
        } else {
            self.throttler.should_emit()
        };
        if emit {
            self.emit_progress(&mut inner);
        }
    }

    /// 基于当前进度计算新进度
    pub(crate) fn update_progress_with(&self, f: impl FnOnce(&ProgressState) -> ProgressState) {
        let next = f(&self.progress());
        self.update_progress(next, false);
    }

    pub(crate) fn pause_requested(&self) -> bool {
        *self.pause_tx.borrow()
    }

    pub(crate) fn pause_watch(&self) -> watch::Receiver<bool> {
        self.pause_tx.subscribe()
    }

    /// 工作协程到达安全点，暂停生效
    pub(crate) fn mark_paused(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.status.pause_state != TriState::Processing || !self.pause_requested() {
            return false;
        }
        inner.status.pause_state = TriState::True;
        self.emit_status(&mut inner);
        drop(inner);
        info!("任务已暂停: {}", self.id);
        true
    }

    /// 工作协程恢复数据传输
    pub(crate) fn mark_resumed(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.status.pause_state != TriState::Processing || self.pause_requested() {
            return false;
        }
        inner.status.pause_state = TriState::False;
        self.emit_status(&mut inner);
        drop(inner);
        info!("任务已恢复: {}", self.id);
        true
    }

    pub(crate) fn restriction(&self) -> Option<RestrictedContent> {
        self.restriction.lock().clone()
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// 进入 `Done`，只生效一次
    pub(crate) fn finish(&self, outcome: TaskOutcome, error: Option<ErrorKind>) -> bool {
        let mut inner = self.inner.lock();
        if inner.status.is_terminal() {
            return false;
        }
        self.throttler.force_emit();
        self.emit_progress(&mut inner);
        // 终止状态总是经过 Processing，订阅者看到完整的 False → Processing → True
        if inner.status.terminate_state == TriState::False {
            inner.status.terminate_state = TriState::Processing;
            self.emit_status(&mut inner);
        }
        inner.status.finish(outcome, error);
        self.emit_status(&mut inner);
        // 结束后不再有事件，关闭所有订阅通道
        inner.subscribers.clear();
        drop(inner);

        self.done_tx.send_replace(true);
        true
    }

    /// 关闭时强制终止（包括正在停止的直播）
    pub(crate) fn force_terminate(&self) {
        let mut inner = self.inner.lock();
        if inner.status.is_terminal() {
            return;
        }
        if inner.status.terminate_state == TriState::False {
            inner.status.terminate_state = TriState::Processing;
            self.emit_status(&mut inner);
        }
        drop(inner);
        self.cancel.cancel();
    }
}

/// 下载任务
#[derive(Clone)]
pub struct DownloadTask {
    shared: Arc<TaskShared>,
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("id", &self.shared.id)
            .field("content_type", &self.content_type())
            .field("phase", &self.shared.phase())
            .finish()
    }
}

impl DownloadTask {
    pub(crate) fn from_shared(shared: Arc<TaskShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<TaskShared> {
        &self.shared
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn info(&self) -> &DownloadInfo {
        &self.shared.info
    }

    pub fn content_type(&self) -> ContentType {
        self.shared.content_type()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.shared.created_at
    }

    /// 当前状态快照
    pub fn status(&self) -> StatusState {
        self.shared.status()
    }

    /// 当前进度快照
    pub fn progress(&self) -> ProgressState {
        self.shared.progress()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let inner = self.shared.inner.lock();
        TaskSnapshot {
            id: self.shared.id.clone(),
            info: self.shared.info.clone(),
            created_at: self.shared.created_at,
            status: inner.status.clone(),
            progress: inner.progress.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.shared.inner.lock().status.is_terminal()
    }

    /// 订阅事件
    ///
    /// 新订阅者首先收到当前状态与进度，之后按产生顺序收到后续事件
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TaskEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.shared.inner.lock();
        let _ = tx.send(TaskEvent::Status {
            task_id: self.shared.id.clone(),
            status: inner.status.clone(),
        });
        let _ = tx.send(TaskEvent::Progress {
            task_id: self.shared.id.clone(),
            progress: inner.progress.clone(),
        });
        if !inner.status.is_terminal() {
            inner.subscribers.push(tx);
        }
        rx
    }

    /// 等待任务结束
    pub async fn wait_done(&self) {
        let mut rx = self.shared.done_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// 暂停（仅录像，且仅在下载阶段）
    pub fn pause(&self) -> EngineResult<()> {
        let shared = &self.shared;
        let ct = shared.content_type();
        if !ct.is_pausable() {
            return Err(EngineError::InvalidState(format!("{} 不支持暂停", ct)));
        }

        let mut inner = shared.inner.lock();
        let status = &inner.status;
        if status.phase != Phase::Downloading {
            return Err(EngineError::InvalidState(format!(
                "任务 {} 处于 {} 阶段，无法暂停",
                shared.id, status.phase
            )));
        }
        if status.terminate_state != TriState::False {
            return Err(EngineError::InvalidState(format!("任务 {} 正在终止", shared.id)));
        }
        if status.pause_state != TriState::False {
            return Err(EngineError::InvalidState(format!(
                "任务 {} 已暂停或正在处理暂停请求",
                shared.id
            )));
        }

        inner.status.pause_state = TriState::Processing;
        shared.emit_status(&mut inner);
        shared.pause_tx.send_replace(true);
        drop(inner);

        debug!("收到暂停请求: {}", shared.id);
        Ok(())
    }

    /// 恢复（仅已暂停的任务）
    pub fn resume(&self) -> EngineResult<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        let status = &inner.status;
        if status.phase != Phase::Downloading || status.pause_state != TriState::True {
            return Err(EngineError::InvalidState(format!(
                "任务 {} 未处于暂停状态",
                shared.id
            )));
        }
        if status.terminate_state != TriState::False {
            return Err(EngineError::InvalidState(format!("任务 {} 正在终止", shared.id)));
        }

        inner.status.pause_state = TriState::Processing;
        shared.emit_status(&mut inner);
        shared.pause_tx.send_replace(false);
        drop(inner);

        debug!("收到恢复请求: {}", shared.id);
        Ok(())
    }

    /// 取消
    ///
    /// 直播在下载阶段的取消即"停止录制"：已录制数据继续后处理并保留
    pub fn cancel(&self) -> EngineResult<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        if inner.status.is_terminal() {
            return Err(EngineError::InvalidState(format!("任务 {} 已结束", shared.id)));
        }
        if inner.status.terminate_state != TriState::False {
            return Err(EngineError::InvalidState(format!(
                "任务 {} 正在终止",
                shared.id
            )));
        }

        inner.status.terminate_state = TriState::Processing;
        shared.emit_status(&mut inner);
        let stop = shared.content_type() == ContentType::Stream
            && inner.status.phase == Phase::Downloading;
        if stop {
            shared.stop.cancel();
        } else {
            shared.cancel.cancel();
        }
        drop(inner);

        if stop {
            info!("收到停止录制请求: {}", shared.id);
        } else {
            info!("收到取消请求: {}", shared.id);
        }
        Ok(())
    }

    /// 内容受限，终止任务并原样记录限制信息
    pub fn abort_restricted(&self, restriction: RestrictedContent) -> EngineResult<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        if inner.status.is_terminal() {
            return Err(EngineError::InvalidState(format!("任务 {} 已结束", shared.id)));
        }

        {
            let mut slot = shared.restriction.lock();
            if slot.is_none() {
                *slot = Some(restriction.clone());
            }
        }
        if inner.status.terminate_state == TriState::False {
            inner.status.terminate_state = TriState::Processing;
            shared.emit_status(&mut inner);
        }
        shared.cancel.cancel();
        drop(inner);

        info!("任务因内容限制终止: {} ({})", shared.id, restriction);
        Ok(())
    }
}
