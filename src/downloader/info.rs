use crate::downloader::error::{EngineError, EngineResult};
use crate::metadata::{Channel, ClipData, Game, StreamData, VideoData};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 内容类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Stream,
    Video,
    Clip,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [ContentType::Stream, ContentType::Video, ContentType::Clip];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Stream => "stream",
            ContentType::Video => "video",
            ContentType::Clip => "clip",
        }
    }

    /// 是否提供暂停操作（仅录像）
    pub fn is_pausable(&self) -> bool {
        match self {
            ContentType::Video => true,
            ContentType::Stream | ContentType::Clip => false,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 裁剪区间（毫秒，起止可分别为空）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
}

impl TimeRange {
    pub fn new(start_ms: Option<u64>, end_ms: Option<u64>) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn from_seconds(start: Option<u64>, end: Option<u64>) -> Self {
        Self::new(start.map(|s| s * 1000), end.map(|s| s * 1000))
    }

    pub fn is_full(&self) -> bool {
        self.start_ms.is_none() && self.end_ms.is_none()
    }

    pub fn start_seconds(&self) -> Option<f64> {
        self.start_ms.map(|ms| ms as f64 / 1000.0)
    }

    pub fn end_seconds(&self) -> Option<f64> {
        self.end_ms.map(|ms| ms as f64 / 1000.0)
    }
}

/// 清晰度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// 展示名称，如 "1080p60"
    pub name: String,
    /// 播放列表分组 ID，如 "chunked"
    pub group_id: String,
    pub url: String,
}

/// 功能开关
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// 恢复被静音的片段
    #[serde(default)]
    pub unmute_video: bool,
    /// 下载完成后继续检查新增片段
    #[serde(default)]
    pub update_track: bool,
    /// 剪辑模式（按片段边界裁剪，不重新编码）
    #[serde(default)]
    pub clipping_mode: bool,
    /// 在等待队列中优先
    #[serde(default)]
    pub prioritize: bool,
}

/// 访问凭证
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessCredential {
    Anonymous,
    Token { value: String, signature: String },
    /// 外部播放列表（非官方来源的内容）
    ExternalPlaylist { url: String },
}

impl AccessCredential {
    pub fn is_external(&self) -> bool {
        matches!(self, AccessCredential::ExternalPlaylist { .. })
    }
}

/// 内容描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "content_type", content = "data", rename_all = "lowercase")]
pub enum ContentDescriptor {
    Stream(StreamData),
    Video(VideoData),
    Clip(ClipData),
}

impl ContentDescriptor {
    pub fn content_type(&self) -> ContentType {
        match self {
            ContentDescriptor::Stream(_) => ContentType::Stream,
            ContentDescriptor::Video(_) => ContentType::Video,
            ContentDescriptor::Clip(_) => ContentType::Clip,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ContentDescriptor::Stream(s) => &s.id,
            ContentDescriptor::Video(v) => &v.id,
            ContentDescriptor::Clip(c) => &c.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            ContentDescriptor::Stream(s) => &s.title,
            ContentDescriptor::Video(v) => &v.title,
            ContentDescriptor::Clip(c) => &c.title,
        }
    }

    /// 内容所属频道
    pub fn channel(&self) -> &Channel {
        match self {
            ContentDescriptor::Stream(s) => &s.broadcaster,
            ContentDescriptor::Video(v) => &v.owner,
            ContentDescriptor::Clip(c) => &c.broadcaster,
        }
    }

    pub fn game(&self) -> Option<&Game> {
        match self {
            ContentDescriptor::Stream(s) => s.game.as_ref(),
            ContentDescriptor::Video(v) => v.game.as_ref(),
            ContentDescriptor::Clip(c) => c.game.as_ref(),
        }
    }

    /// 内容类型标签：直播区分 "stream" / "rerun"
    pub fn type_label(&self) -> &'static str {
        match self {
            ContentDescriptor::Stream(s) if s.is_live() => "stream",
            ContentDescriptor::Stream(_) => "rerun",
            ContentDescriptor::Video(_) => "video",
            ContentDescriptor::Clip(_) => "clip",
        }
    }
}

/// 下载参数（任务创建后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub content: ContentDescriptor,
    pub output_path: PathBuf,
    #[serde(default)]
    pub range: TimeRange,
    pub resolution: Resolution,
    #[serde(default)]
    pub options: DownloadOptions,
    pub access: AccessCredential,
}

impl DownloadInfo {
    pub fn new(
        content: ContentDescriptor,
        output_path: impl Into<PathBuf>,
        resolution: Resolution,
        access: AccessCredential,
    ) -> Self {
        Self {
            content,
            output_path: output_path.into(),
            range: TimeRange::default(),
            resolution,
            options: DownloadOptions::default(),
            access,
        }
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn content_type(&self) -> ContentType {
        self.content.content_type()
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// 下载过程中的原始数据文件（`<输出文件>.part`），文件名即表明其不完整
    pub fn raw_path(&self) -> PathBuf {
        let mut name = self
            .output_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".part");
        self.output_path.with_file_name(name)
    }

    /// 实际下载时长（秒）
    ///
    /// - 录像：`(end 或 总长) - (start 或 0)`
    /// - 剪辑：剪辑时长
    /// - 直播：未知
    pub fn duration_seconds(&self) -> Option<f64> {
        match &self.content {
            ContentDescriptor::Video(v) => {
                let total = v.length_seconds as f64;
                let start = self.range.start_seconds().unwrap_or(0.0);
                let end = self.range.end_seconds().unwrap_or(total);
                Some((end - start).max(0.0))
            }
            ContentDescriptor::Clip(c) => Some(c.duration_seconds as f64),
            ContentDescriptor::Stream(_) => None,
        }
    }

    /// 是否需要后处理（裁剪、静音恢复、轨道更新）
    pub fn requests_post_processing(&self) -> bool {
        !self.range.is_full() || self.options.unmute_video || self.options.update_track
    }

    /// 校验参数组合
    pub fn validate(&self) -> EngineResult<()> {
        if self.output_path.file_name().is_none() {
            return Err(EngineError::InvalidInfo(format!(
                "输出路径缺少文件名: {:?}",
                self.output_path
            )));
        }

        let ct = self.content_type();
        if ct != ContentType::Video {
            if !self.range.is_full() {
                return Err(EngineError::InvalidInfo(format!("{} 不支持裁剪", ct)));
            }
            if self.options.unmute_video || self.options.update_track || self.options.clipping_mode {
                return Err(EngineError::InvalidInfo(format!("{} 不支持录像专用选项", ct)));
            }
        }

        if let ContentDescriptor::Video(v) = &self.content {
            let length_ms = v.length_seconds * 1000;
            if let (Some(start), Some(end)) = (self.range.start_ms, self.range.end_ms) {
                if start >= end {
                    return Err(EngineError::InvalidInfo(format!(
                        "裁剪区间无效: start={}ms, end={}ms",
                        start, end
                    )));
                }
            }
            if self.range.start_ms.map_or(false, |s| s >= length_ms)
                || self.range.end_ms.map_or(false, |e| e > length_ms)
            {
                return Err(EngineError::InvalidInfo(format!(
                    "裁剪区间超出录像长度 {}s",
                    v.length_seconds
                )));
            }
        }

        Ok(())
    }
}
