// 应用全局状态

use crate::config::AppConfig;
use crate::downloader::{DownloadManager, Encoder, MediaSource, RetryCoordinator};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// 应用全局状态
#[derive(Debug, Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Arc<AppConfig>,
    /// 下载管理器
    pub download_manager: Arc<DownloadManager>,
    /// 失败任务重试
    pub retry_coordinator: RetryCoordinator,
}

impl AppState {
    /// 以给定配置创建
    pub fn new(
        config: AppConfig,
        source: Arc<dyn MediaSource>,
        encoder: Arc<dyn Encoder>,
    ) -> Result<Self> {
        config.download.validate().context("下载配置无效")?;

        let download_manager = Arc::new(DownloadManager::new(&config, source, encoder));
        let retry_coordinator = RetryCoordinator::new(Arc::clone(&download_manager));
        Ok(Self {
            config: Arc::new(config),
            download_manager,
            retry_coordinator,
        })
    }

    /// 从配置文件创建（文件不存在时写入默认配置）
    pub async fn load(
        path: &str,
        source: Arc<dyn MediaSource>,
        encoder: Arc<dyn Encoder>,
    ) -> Result<Self> {
        let config = AppConfig::load_or_default(path).await;
        Self::new(config, source, encoder)
    }

    /// 退出前调用：取消所有任务并等待结束
    ///
    /// 返回 false 表示仍有任务未能在期限内结束
    pub async fn shutdown(&self) -> bool {
        if !self.download_manager.is_downloader_running() {
            self.download_manager.begin_shutdown();
            info!("没有进行中的任务，直接退出");
            return true;
        }

        let deadline = self.config.shutdown.wait_timeout();
        info!("正在停止所有下载任务（最多等待 {}s）...", deadline.as_secs());
        let finished = self.download_manager.shutdown(deadline).await;
        if finished {
            info!("✅ 下载器已安全关闭");
        } else {
            warn!("⚠️ 部分任务未能结束，强制退出");
        }
        finished
    }
}
