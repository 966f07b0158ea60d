// 配置管理模块

use crate::downloader::ContentType;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// 下载配置
    #[serde(default)]
    pub download: DownloadConfig,
    /// 重试配置
    #[serde(default)]
    pub retry: RetryConfig,
    /// 退出配置
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 20MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    20 * 1024 * 1024
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 下载配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 直播录制并发数（直播持续时间长，通常较小）
    #[serde(default = "default_stream_pool_size")]
    pub stream_pool_size: usize,
    /// 录像下载并发数
    #[serde(default = "default_video_pool_size")]
    pub video_pool_size: usize,
    /// 剪辑下载并发数
    #[serde(default = "default_clip_pool_size")]
    pub clip_pool_size: usize,
    /// 预计等待时间的平均窗口（最近 N 次完成）
    #[serde(default = "default_wait_history_window")]
    pub wait_history_window: usize,
    /// 没有历史记录时的预计等待（秒）
    #[serde(default = "default_wait_secs")]
    pub default_wait_secs: u64,
    /// 等待期间刷新排队信息的间隔（毫秒）
    #[serde(default = "default_wait_refresh_interval_ms")]
    pub wait_refresh_interval_ms: u64,
    /// 单块数据拉取超时（秒）
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
    /// 取消编码后等待编码器退出的宽限期（秒）
    #[serde(default = "default_encode_cancel_grace_secs")]
    pub encode_cancel_grace_secs: u64,
    /// 编码阶段取消时是否保留原始数据
    #[serde(default)]
    pub keep_raw_on_encode_cancel: bool,
    /// 进度事件节流间隔（毫秒）
    #[serde(default = "default_progress_throttle_ms")]
    pub progress_throttle_ms: u64,
}

fn default_stream_pool_size() -> usize {
    2
}

fn default_video_pool_size() -> usize {
    3
}

fn default_clip_pool_size() -> usize {
    5
}

fn default_wait_history_window() -> usize {
    10
}

fn default_wait_secs() -> u64 {
    60
}

fn default_wait_refresh_interval_ms() -> u64 {
    1000
}

fn default_chunk_timeout_secs() -> u64 {
    30
}

fn default_encode_cancel_grace_secs() -> u64 {
    5
}

fn default_progress_throttle_ms() -> u64 {
    crate::events::DEFAULT_THROTTLE_INTERVAL_MS
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            stream_pool_size: default_stream_pool_size(),
            video_pool_size: default_video_pool_size(),
            clip_pool_size: default_clip_pool_size(),
            wait_history_window: default_wait_history_window(),
            default_wait_secs: default_wait_secs(),
            wait_refresh_interval_ms: default_wait_refresh_interval_ms(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            encode_cancel_grace_secs: default_encode_cancel_grace_secs(),
            keep_raw_on_encode_cancel: false,
            progress_throttle_ms: default_progress_throttle_ms(),
        }
    }
}

impl DownloadConfig {
    /// 获取内容类型对应的并发数
    pub fn pool_size(&self, content_type: ContentType) -> usize {
        match content_type {
            ContentType::Stream => self.stream_pool_size,
            ContentType::Video => self.video_pool_size,
            ContentType::Clip => self.clip_pool_size,
        }
    }

    pub fn default_wait(&self) -> Duration {
        Duration::from_secs(self.default_wait_secs)
    }

    pub fn wait_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.wait_refresh_interval_ms.max(1))
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn encode_cancel_grace(&self) -> Duration {
        Duration::from_secs(self.encode_cancel_grace_secs)
    }

    pub fn validate(&self) -> Result<()> {
        for ct in ContentType::ALL {
            if self.pool_size(ct) == 0 {
                anyhow::bail!("{} 并发数必须大于 0", ct);
            }
        }
        if self.wait_history_window == 0 {
            anyhow::bail!("wait_history_window 必须大于 0");
        }
        if self.chunk_timeout_secs == 0 {
            anyhow::bail!("chunk_timeout_secs 必须大于 0");
        }
        Ok(())
    }
}

/// 重试配置（单块拉取失败时的退避策略）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 最大尝试次数（包括第一次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 首次重试延迟（毫秒）
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// 最大重试延迟（毫秒）
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 延迟倍数
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

/// 退出配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 等待所有任务结束的最长时间（秒）
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    /// 超时后强制终止任务的额外等待（秒）
    #[serde(default = "default_force_grace_secs")]
    pub force_grace_secs: u64,
}

fn default_wait_timeout_secs() -> u64 {
    30
}

fn default_force_grace_secs() -> u64 {
    5
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: default_wait_timeout_secs(),
            force_grace_secs: default_force_grace_secs(),
        }
    }
}

impl ShutdownConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn force_grace(&self) -> Duration {
        Duration::from_secs(self.force_grace_secs)
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .download
            .validate()
            .context("配置文件中的下载配置验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.download
            .validate()
            .context("保存配置失败：下载配置无效")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);

        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {:#}", e);
                }

                default_config
            }
        }
    }
}
