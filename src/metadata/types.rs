//! 内容描述类型
//!
//! 由数据获取层（GraphQL）返回的直播、录像、剪辑元数据，字段命名与接口保持一致（camelCase）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 游戏分类
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "boxArtURL")]
    pub box_art_url: Option<String>,
    pub display_name: String,
}

/// 频道（用户）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub login: String,
    pub display_name: String,
    #[serde(default, rename = "profileImageURL")]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// 直播类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Live,
    Rerun,
}

/// 直播
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamData {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub game: Option<Game>,
    #[serde(rename = "type")]
    pub stream_type: StreamType,
    #[serde(default, rename = "previewImageURL")]
    pub preview_image_url: Option<String>,
    pub broadcaster: Channel,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub viewers_count: u64,
}

impl StreamData {
    pub fn is_live(&self) -> bool {
        self.stream_type == StreamType::Live
    }
}

/// 录像（VOD）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoData {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub game: Option<Game>,
    #[serde(default, rename = "previewThumbnailURL")]
    pub preview_thumbnail_url: Option<String>,
    pub owner: Channel,
    #[serde(default)]
    pub creator: Option<Channel>,
    pub length_seconds: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub view_count: u64,
}

/// 剪辑
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipData {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub game: Option<Game>,
    #[serde(default, rename = "thumbnailURL")]
    pub thumbnail_url: Option<String>,
    pub slug: String,
    pub url: String,
    pub broadcaster: Channel,
    #[serde(default)]
    pub curator: Option<Channel>,
    pub duration_seconds: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub view_count: u64,
}
