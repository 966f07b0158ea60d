//! 失败任务重试
//!
//! 重试不会复活原任务：以原任务的下载信息创建一个新任务，原任务保持 `Done` 与原错误不变，
//! 由调用方决定是否移除。

use crate::downloader::error::{EngineError, EngineResult};
use crate::downloader::manager::DownloadManager;
use std::sync::Arc;
use tracing::info;

/// 重试协调器
#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    manager: Arc<DownloadManager>,
}

impl RetryCoordinator {
    pub fn new(manager: Arc<DownloadManager>) -> Self {
        Self { manager }
    }

    /// 重试一个失败的任务，返回新任务 ID
    pub fn retry(&self, failed_task_id: &str) -> EngineResult<String> {
        let task = self.manager.get(failed_task_id)?;
        let status = task.status();
        if !status.is_terminal() || !status.has_error() {
            return Err(EngineError::InvalidState(format!(
                "任务 {} 未失败，无法重试",
                failed_task_id
            )));
        }

        let reason = status
            .error
            .as_ref()
            .map(|e| e.reason_key())
            .unwrap_or("unknown-error");
        let new_id = self.manager.create(task.info().clone())?;
        info!(
            "重试失败任务: {} [{}] -> 新任务 {}",
            failed_task_id, reason, new_id
        );
        Ok(new_id)
    }

    /// 重试所有失败的任务，返回 (原任务 ID, 新任务 ID)
    pub fn retry_all_failed(&self) -> Vec<(String, String)> {
        self.manager
            .tasks()
            .into_iter()
            .filter(|t| t.status().has_error())
            .filter_map(|t| {
                let id = t.id().to_string();
                self.retry(&id).ok().map(|new_id| (id, new_id))
            })
            .collect()
    }
}
