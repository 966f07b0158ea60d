//! 下载错误分类
//!
//! - `ErrorKind`：任务终止时记录到 `StatusState.error` 的失败类型（互斥，仅记录一次）
//! - `EngineError`：命令调用失败（任务不存在、状态不允许等）
//! - `SourceError` / `EncodeError`：外部协作者（采集源、编码器）返回的错误

use crate::downloader::info::ContentType;
use crate::metadata::Channel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 内容限制范围
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "content_type", rename_all = "snake_case")]
pub enum RestrictionScope {
    /// 整个频道的内容都被限制
    Channel,
    /// 仅限制该频道的某一类内容
    ContentType(ContentType),
}

/// 内容限制信息（由服务端下发，原样记录）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestrictedContent {
    /// 限制范围
    pub scope: RestrictionScope,
    /// 被限制的频道
    pub channel: Channel,
    /// 结构化原因代码
    pub reason: String,
    /// 可选的人类可读说明
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RestrictedContent {
    pub fn new(scope: RestrictionScope, channel: Channel, reason: impl Into<String>) -> Self {
        Self {
            scope,
            channel,
            reason: reason.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// 判断该限制是否覆盖指定频道的指定内容类型
    pub fn applies_to(&self, channel_id: &str, content_type: ContentType) -> bool {
        if self.channel.id != channel_id {
            return false;
        }
        match self.scope {
            RestrictionScope::Channel => true,
            RestrictionScope::ContentType(ct) => ct == content_type,
        }
    }

    /// 生成展示给用户的说明文本
    pub fn describe(&self) -> String {
        let scope_text = match self.scope {
            RestrictionScope::Channel => format!(
                "This content has been restricted by the streamer({})'s request or by the administrator.",
                self.channel.display_name
            ),
            RestrictionScope::ContentType(ct) => format!(
                "Downloading {} from this channel has been restricted by the streamer({})'s request or by the administrator.",
                ct.as_str(),
                self.channel.display_name
            ),
        };
        let mut text = format!(
            "Your download has been terminated due to content restrictions.\n\n{}",
            scope_text
        );
        if let Some(ref message) = self.message {
            text.push_str("\n\n[reason]\n");
            text.push_str(message);
        }
        text
    }
}

impl std::fmt::Display for RestrictedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.reason, self.channel.login)
    }
}

/// 任务失败类型
///
/// 在任务进入 `Done` 时写入一次，之后不可修改
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum ErrorKind {
    /// 磁盘或路径错误
    #[error("文件系统错误: {0}")]
    FileSystemError(String),
    /// 拉取或连接失败（已耗尽重试次数）
    #[error("网络错误: {0}")]
    NetworkError(String),
    /// 服务端下架或限制
    #[error("内容受限: {0}")]
    RestrictedContent(RestrictedContent),
    /// 其他错误
    #[error("未知错误: {0}")]
    UnknownError(String),
}

impl ErrorKind {
    /// 界面层用于查找提示文案的键
    pub fn reason_key(&self) -> &'static str {
        match self {
            ErrorKind::FileSystemError(_) => "system-error",
            ErrorKind::NetworkError(_) => "network-error",
            ErrorKind::RestrictedContent(_) => "restricted-content",
            ErrorKind::UnknownError(_) => "unknown-error",
        }
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(e: std::io::Error) -> Self {
        ErrorKind::FileSystemError(e.to_string())
    }
}

/// 命令错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("任务不存在: {0}")]
    NotFound(String),
    #[error("当前状态不允许该操作: {0}")]
    InvalidState(String),
    #[error("下载参数无效: {0}")]
    InvalidInfo(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// 采集源错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// 网络错误；`transient` 为 true 时由任务内部按退避策略重试
    #[error("网络错误: {message}")]
    Network { message: String, transient: bool },
    /// 内容受限
    #[error("内容受限: {0}")]
    Restricted(RestrictedContent),
    #[error("采集源错误: {0}")]
    Other(String),
}

impl SourceError {
    pub fn transient(message: impl Into<String>) -> Self {
        SourceError::Network {
            message: message.into(),
            transient: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        SourceError::Network {
            message: message.into(),
            transient: false,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Network { transient: true, .. })
    }
}

impl From<SourceError> for ErrorKind {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Network { message, .. } => ErrorKind::NetworkError(message),
            SourceError::Restricted(r) => ErrorKind::RestrictedContent(r),
            SourceError::Other(message) => ErrorKind::UnknownError(message),
        }
    }
}

/// 编码器错误
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("编码 IO 错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("编码已中止")]
    Aborted,
    #[error("编码失败: {0}")]
    Failed(String),
}

impl From<EncodeError> for ErrorKind {
    fn from(e: EncodeError) -> Self {
        match e {
            EncodeError::Io(e) => ErrorKind::FileSystemError(e.to_string()),
            other => ErrorKind::UnknownError(other.to_string()),
        }
    }
}
