//! 进度快照
//!
//! 百分比在产生时即被限制在 [0, 100]；越界输入视为上游计算错误，记录警告后截断。

use crate::downloader::info::ContentType;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// 将百分比限制在 [0, 100]
///
/// NaN 视为 0
pub fn clamp_percent(value: f64, field: &'static str) -> f64 {
    if value.is_nan() {
        warn!("进度值无效: {}=NaN，按 0 处理", field);
        return 0.0;
    }
    if !(0.0..=100.0).contains(&value) {
        warn!("进度值越界: {}={}，已截断到 [0, 100]", field, value);
        return value.clamp(0.0, 100.0);
    }
    value
}

/// 按比例计算百分比，`total` 为 0 时返回 0
pub fn percent_of(done: u64, total: u64, field: &'static str) -> f64 {
    if total == 0 {
        return 0.0;
    }
    clamp_percent(done as f64 / total as f64 * 100.0, field)
}

/// 进度快照（按内容类型区分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "content_type", rename_all = "lowercase")]
pub enum ProgressState {
    /// 直播：已录制时长（下载期间单调不减）
    Stream { seconds: f64, downloaded_bytes: u64 },
    /// 录像：下载阶段看 `file_progress`，后处理阶段看 `time_progress`
    Video {
        file_progress: f64,
        time_progress: f64,
        downloaded_segments: u64,
        total_segments: u64,
    },
    /// 剪辑：按字节
    Clip {
        size_progress: f64,
        downloaded_bytes: u64,
        total_bytes: u64,
    },
}

impl ProgressState {
    pub fn initial(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Stream => ProgressState::Stream {
                seconds: 0.0,
                downloaded_bytes: 0,
            },
            ContentType::Video => ProgressState::Video {
                file_progress: 0.0,
                time_progress: 0.0,
                downloaded_segments: 0,
                total_segments: 0,
            },
            ContentType::Clip => ProgressState::Clip {
                size_progress: 0.0,
                downloaded_bytes: 0,
                total_bytes: 0,
            },
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            ProgressState::Stream { .. } => ContentType::Stream,
            ProgressState::Video { .. } => ContentType::Video,
            ProgressState::Clip { .. } => ContentType::Clip,
        }
    }

    pub fn stream(seconds: f64, downloaded_bytes: u64) -> Self {
        ProgressState::Stream {
            seconds: seconds.max(0.0),
            downloaded_bytes,
        }
    }

    pub fn video(downloaded_segments: u64, total_segments: u64) -> Self {
        ProgressState::Video {
            file_progress: percent_of(downloaded_segments, total_segments, "file_progress"),
            time_progress: 0.0,
            downloaded_segments,
            total_segments,
        }
    }

    pub fn clip(downloaded_bytes: u64, total_bytes: u64) -> Self {
        ProgressState::Clip {
            size_progress: percent_of(downloaded_bytes, total_bytes, "size_progress"),
            downloaded_bytes,
            total_bytes,
        }
    }

    /// 设置后处理进度（仅录像有意义，其他类型原样返回）
    pub fn with_time_progress(&self, percent: f64) -> Self {
        match self {
            ProgressState::Video {
                file_progress,
                downloaded_segments,
                total_segments,
                ..
            } => ProgressState::Video {
                file_progress: *file_progress,
                time_progress: clamp_percent(percent, "time_progress"),
                downloaded_segments: *downloaded_segments,
                total_segments: *total_segments,
            },
            other => other.clone(),
        }
    }

    /// 用于界面显示的整数百分比；直播没有百分比
    pub fn display_percent(&self) -> Option<u8> {
        let value = match self {
            ProgressState::Stream { .. } => return None,
            ProgressState::Video {
                file_progress,
                time_progress,
                ..
            } => {
                if *time_progress > 0.0 {
                    *time_progress
                } else {
                    *file_progress
                }
            }
            ProgressState::Clip { size_progress, .. } => *size_progress,
        };
        Some(value.floor() as u8)
    }
}
