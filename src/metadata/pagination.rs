//! 游标分页
//!
//! 列表接口只支持向前翻页：每页返回 `edges` 与 `hasNextPage`，不提供总数。
//! `Pager` 记录最后一条边的游标并按需拉取下一页。

use crate::downloader::error::SourceError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// 列表类型及其过滤条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingKind {
    /// 频道录像：类型过滤（ARCHIVE / HIGHLIGHT / UPLOAD，None 表示全部）+ 排序
    Videos {
        broadcast_type: Option<String>,
        sort: String,
    },
    /// 频道剪辑：时间范围过滤（LAST_DAY / LAST_WEEK / ALL_TIME ...）
    Clips { filter: String },
}

/// 列表请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingQuery {
    pub parent_login: String,
    pub kind: ListingKind,
    pub page_size: u32,
    pub cursor: Option<String>,
}

impl ListingQuery {
    pub fn new(parent_login: impl Into<String>, kind: ListingKind, page_size: u32) -> Self {
        Self {
            parent_login: parent_login.into(),
            kind,
            page_size,
            cursor: None,
        }
    }

    /// 生成 GraphQL 变量
    pub fn variables(&self) -> Value {
        let cursor = self.cursor.clone().unwrap_or_default();
        match &self.kind {
            ListingKind::Videos {
                broadcast_type,
                sort,
            } => json!({
                "login": self.parent_login,
                "type": broadcast_type,
                "sort": sort,
                "limit": self.page_size,
                "cursor": cursor,
            }),
            ListingKind::Clips { filter } => json!({
                "login": self.parent_login,
                "filter": filter,
                "limit": self.page_size,
                "cursor": cursor,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<T> {
    pub cursor: String,
    pub node: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
}

/// 一页结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
}

impl<T> Connection<T> {
    pub fn last_cursor(&self) -> Option<&str> {
        self.edges.last().map(|e| e.cursor.as_str())
    }
}

/// 从 GraphQL 响应中按路径取出分页结构，例如 `["data", "user", "videos"]`
pub fn parse_connection<T: DeserializeOwned>(
    value: &Value,
    path: &[&str],
) -> Result<Connection<T>, SourceError> {
    let mut current = value;
    for key in path {
        current = current
            .get(key)
            .filter(|v| !v.is_null())
            .ok_or_else(|| SourceError::Other(format!("响应缺少字段: {}", key)))?;
    }
    serde_json::from_value(current.clone())
        .map_err(|e| SourceError::Other(format!("解析分页结构失败: {}", e)))
}

/// 分页数据源
#[async_trait]
pub trait PageSource<T>: Send + Sync {
    async fn fetch_page(&self, query: &ListingQuery) -> Result<Connection<T>, SourceError>;
}

/// 向前翻页器
pub struct Pager<'a, T> {
    source: &'a dyn PageSource<T>,
    query: ListingQuery,
    exhausted: bool,
}

impl<'a, T> Pager<'a, T> {
    pub fn new(source: &'a dyn PageSource<T>, query: ListingQuery) -> Self {
        Self {
            source,
            query,
            exhausted: false,
        }
    }

    pub fn has_more(&self) -> bool {
        !self.exhausted
    }

    /// 拉取下一页，没有更多数据时返回 `None`
    pub async fn next_page(&mut self) -> Result<Option<Vec<T>>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self.source.fetch_page(&self.query).await?;
        match page.last_cursor() {
            Some(cursor) => self.query.cursor = Some(cursor.to_string()),
            None => self.exhausted = true,
        }
        if !page.page_info.has_next_page {
            self.exhausted = true;
        }

        debug!(
            "拉取分页: login={}, 条目数={}, 还有更多={}",
            self.query.parent_login,
            page.edges.len(),
            !self.exhausted
        );

        Ok(Some(page.edges.into_iter().map(|e| e.node).collect()))
    }
}
