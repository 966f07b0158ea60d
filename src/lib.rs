// Twitch 下载引擎核心库
// 任务生命周期、并发槽位、排队、重试与关闭

// 配置管理模块
pub mod config;

// 下载引擎模块
pub mod downloader;

// 任务事件
pub mod events;

// 日志系统
pub mod logging;

// 内容元数据与分页
pub mod metadata;

// 应用全局状态
pub mod state;

// 导出常用类型
pub use config::AppConfig;
pub use downloader::{
    ContentType, DownloadInfo, DownloadManager, DownloadTask, ErrorKind, Phase, ProgressState,
    RetryCoordinator, StatusState, TaskOutcome,
};
pub use events::TaskEvent;
pub use state::AppState;
