//! 元数据模块
//!
//! 数据获取层提供的内容描述与分页结构

mod pagination;
mod types;

pub use pagination::{
    parse_connection, Connection, Edge, ListingKind, ListingQuery, PageInfo, PageSource, Pager,
};
pub use types::{Channel, ClipData, Game, StreamData, StreamType, VideoData};
