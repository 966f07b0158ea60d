//! 外部协作者接口
//!
//! - `MediaSource` / `Acquisition`：打开采集并逐块返回原始媒体数据
//! - `Encoder`：带进度回调的转码（封装、裁剪、恢复静音）

use crate::downloader::error::{EncodeError, SourceError};
use crate::downloader::info::{DownloadInfo, TimeRange};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// 采集计划（打开采集后即可知）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionPlan {
    /// 原始数据是分片容器（如 TS 片段），需要重新封装
    pub segmented: bool,
    /// 总片段数（录像）
    pub total_segments: Option<u64>,
    /// 总字节数（剪辑）
    pub total_bytes: Option<u64>,
}

/// 一块原始数据
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub data: Vec<u8>,
    /// 本块对应的媒体时长（秒）
    pub media_seconds: f64,
}

impl Chunk {
    pub fn new(data: Vec<u8>, media_seconds: f64) -> Self {
        Self { data, media_seconds }
    }
}

/// 一次采集
#[async_trait]
pub trait Acquisition: Send {
    fn plan(&self) -> AcquisitionPlan;

    /// 取下一块数据，`None` 表示结束（直播下线、录像片段取完）
    ///
    /// 返回可重试错误后会被再次调用，实现方应保证重复调用取的是同一块
    async fn next_chunk(&mut self) -> Result<Option<Chunk>, SourceError>;

    /// 检查新发布的片段，返回新增片段数（仅录像）
    async fn poll_updates(&mut self) -> Result<u64, SourceError> {
        Ok(0)
    }
}

/// 媒体数据源
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn open(&self, info: &DownloadInfo) -> Result<Box<dyn Acquisition>, SourceError>;
}

/// 后处理任务
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub range: TimeRange,
    pub unmute: bool,
    pub clipping_mode: bool,
    /// 目标时长，用于换算进度
    pub duration_seconds: Option<f64>,
}

/// 编码进度回调（0-100）
pub type EncodeProgress = Box<dyn Fn(f64) + Send + Sync>;

/// 编码器
#[async_trait]
pub trait Encoder: Send + Sync {
    /// 转码；`cancel` 被触发后应尽快返回 `EncodeError::Aborted`
    async fn transcode(
        &self,
        job: EncodeJob,
        progress: EncodeProgress,
        cancel: CancellationToken,
    ) -> Result<(), EncodeError>;
}
