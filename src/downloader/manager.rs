//! 下载管理器
//!
//! 任务注册表与命令路由。任务在 `create` 中同步申请槽位后交给各自的工作协程，
//! 管理器只在注册表和槽位池上短暂持锁。

use crate::config::{AppConfig, ShutdownConfig};
use crate::downloader::error::{EngineError, EngineResult, RestrictedContent};
use crate::downloader::info::{ContentType, DownloadInfo};
use crate::downloader::retry::RetryPolicy;
use crate::downloader::source::{Encoder, MediaSource};
use crate::downloader::task::{DownloadTask, TaskShared};
use crate::downloader::task_slot_pool::SlotPools;
use crate::downloader::worker::{self, WorkerContext};
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 下载管理器
///
/// 进程内唯一的任务注册表：创建任务并启动工作协程、按 ID 路由命令、批量取消与关闭检测。
/// 任务只在显式 `remove` 时移出注册表，结束的任务保留最终状态供界面展示。
pub struct DownloadManager {
    /// 所有任务（task_id -> 任务）
    tasks: DashMap<String, DownloadTask>,
    /// 按内容类型划分的槽位池
    pools: Arc<SlotPools>,
    /// 工作协程依赖
    ctx: WorkerContext,
    /// 进度事件节流间隔
    progress_throttle: Duration,
    /// 关闭配置
    shutdown_config: ShutdownConfig,
    /// 进入准备阶段的序号
    next_seq: AtomicU64,
    /// 是否已开始关闭
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("tasks", &self.tasks.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

impl DownloadManager {
    /// 创建下载管理器
    pub fn new(
        config: &AppConfig,
        source: Arc<dyn MediaSource>,
        encoder: Arc<dyn Encoder>,
    ) -> Self {
        let download = Arc::new(config.download.clone());
        let pools = Arc::new(SlotPools::new(
            |ct| download.pool_size(ct),
            download.wait_history_window,
            download.default_wait(),
        ));

        info!(
            "创建下载管理器: 并发数 stream={} video={} clip={}",
            download.stream_pool_size, download.video_pool_size, download.clip_pool_size
        );

        Self {
            tasks: DashMap::new(),
            pools: Arc::clone(&pools),
            progress_throttle: Duration::from_millis(download.progress_throttle_ms),
            ctx: WorkerContext {
                source,
                encoder,
                pools,
                config: download,
                retry: RetryPolicy::from(&config.retry),
            },
            shutdown_config: config.shutdown.clone(),
            next_seq: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// 创建任务并立即启动（不阻塞）
    pub fn create(&self, info: DownloadInfo) -> EngineResult<String> {
        if self.is_shutting_down() {
            return Err(EngineError::InvalidState("下载器正在关闭".to_string()));
        }
        info.validate()?;

        let id = Uuid::new_v4().to_string();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let content_type = info.content_type();
        let output = info.output_path().to_path_buf();
        let prioritize = info.options.prioritize;

        let shared = TaskShared::new(id.clone(), info, seq, self.progress_throttle);
        self.tasks
            .insert(id.clone(), DownloadTask::from_shared(Arc::clone(&shared)));
        // 在启动工作协程前申请槽位，排队顺序即创建顺序
        let admission = self.pools.acquire(content_type, &id, seq, prioritize);
        tokio::spawn(worker::run(shared, self.ctx.clone(), admission));

        info!("创建下载任务: {} type={} 输出={:?}", id, content_type, output);
        Ok(id)
    }

    /// 获取任务
    pub fn get(&self, task_id: &str) -> EngineResult<DownloadTask> {
        self.tasks
            .get(task_id)
            .map(|t| t.value().clone())
            .ok_or_else(|| EngineError::NotFound(task_id.to_string()))
    }

    /// 移除已结束的任务
    pub fn remove(&self, task_id: &str) -> EngineResult<()> {
        let task = self.get(task_id)?;
        if !task.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "任务 {} 尚未结束，请先取消",
                task_id
            )));
        }
        self.tasks.remove(task_id);
        info!("移除任务: {}", task_id);
        Ok(())
    }

    /// 所有任务（按创建顺序）
    pub fn tasks(&self) -> Vec<DownloadTask> {
        let mut tasks: Vec<_> = self
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by_key(|t| t.shared().seq);
        tasks
    }

    pub fn pause(&self, task_id: &str) -> EngineResult<()> {
        self.get(task_id)?.pause()
    }

    pub fn resume(&self, task_id: &str) -> EngineResult<()> {
        self.get(task_id)?.resume()
    }

    pub fn cancel(&self, task_id: &str) -> EngineResult<()> {
        self.get(task_id)?.cancel()
    }

    /// 以内容限制终止指定任务
    pub fn restrict(&self, task_id: &str, restriction: RestrictedContent) -> EngineResult<()> {
        self.get(task_id)?.abort_restricted(restriction)
    }

    /// 以内容限制终止所有受影响的任务，返回受影响的任务 ID
    pub fn apply_restriction(&self, restriction: &RestrictedContent) -> Vec<String> {
        let affected: Vec<String> = self
            .tasks()
            .into_iter()
            .filter(|t| !t.is_terminal())
            .filter(|t| {
                restriction.applies_to(&t.info().content.channel().id, t.content_type())
            })
            .filter_map(|t| match t.abort_restricted(restriction.clone()) {
                Ok(()) => Some(t.id().to_string()),
                Err(e) => {
                    debug!("跳过任务 {}: {}", t.id(), e);
                    None
                }
            })
            .collect();

        if !affected.is_empty() {
            warn!(
                "内容限制生效: channel={} 终止 {} 个任务",
                restriction.channel.login,
                affected.len()
            );
        }
        affected
    }

    /// 取消所有未结束的任务（不等待），返回发出取消的任务数
    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        for task in self.tasks() {
            if task.is_terminal() {
                continue;
            }
            match task.cancel() {
                Ok(()) => count += 1,
                Err(e) => debug!("跳过任务 {}: {}", task.id(), e),
            }
        }
        info!("已对 {} 个任务发出取消", count);
        count
    }

    /// 等待所有任务结束；超过期限返回 false
    pub async fn wait_all(&self, deadline: Duration) -> bool {
        let wait = async {
            loop {
                let pending: Vec<DownloadTask> = self
                    .tasks
                    .iter()
                    .filter(|entry| !entry.value().is_terminal())
                    .map(|entry| entry.value().clone())
                    .collect();
                if pending.is_empty() {
                    break;
                }
                debug!("等待 {} 个任务结束", pending.len());
                join_all(pending.iter().map(|t| t.wait_done())).await;
            }
        };

        match tokio::time::timeout(deadline, wait).await {
            Ok(()) => true,
            Err(_) => {
                warn!("等待任务结束超时（{}s）", deadline.as_secs_f64());
                false
            }
        }
    }

    /// 是否有未结束的任务
    pub fn is_downloader_running(&self) -> bool {
        self.tasks.iter().any(|entry| !entry.value().is_terminal())
    }

    /// 是否已开始关闭
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// 标记开始关闭；返回 false 表示已经在关闭中
    pub fn begin_shutdown(&self) -> bool {
        let first = !self.shutting_down.swap(true, Ordering::SeqCst);
        if first {
            info!("下载器开始关闭");
        }
        first
    }

    /// 关闭：取消所有任务并等待结束
    ///
    /// 超过期限后强制终止剩余任务（包括正在保存的直播），再等待一个宽限期。
    /// 返回所有任务是否都已结束。
    pub async fn shutdown(&self, deadline: Duration) -> bool {
        self.begin_shutdown();
        self.cancel_all();

        if self.wait_all(deadline).await {
            info!("✅ 所有任务已结束");
            return true;
        }

        let remaining: Vec<_> = self
            .tasks()
            .into_iter()
            .filter(|t| !t.is_terminal())
            .collect();
        warn!("强制终止 {} 个未结束的任务", remaining.len());
        for task in &remaining {
            task.shared().force_terminate();
        }

        let finished = self.wait_all(self.shutdown_config.force_grace()).await;
        if !finished {
            error!("仍有任务未能结束，放弃等待");
        }
        finished
    }

    /// 调整内容类型的并发数
    pub fn set_pool_limit(&self, content_type: ContentType, limit: usize) -> EngineResult<()> {
        if limit == 0 {
            return Err(EngineError::InvalidInfo(format!(
                "{} 并发数必须大于 0",
                content_type
            )));
        }
        self.pools.resize(content_type, limit);
        Ok(())
    }

    pub fn pool_limit(&self, content_type: ContentType) -> usize {
        self.pools.max_slots(content_type)
    }

    /// 占用槽位的任务数
    pub fn active_count(&self, content_type: ContentType) -> usize {
        self.pools.active_count(content_type)
    }

    /// 排队中的任务数
    pub fn waiting_count(&self, content_type: ContentType) -> usize {
        self.pools.waiting_count(content_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::error::{ErrorKind, RestrictionScope};
    use crate::downloader::info::tests::{channel, clip_info, stream_info, video_info};
    use crate::downloader::info::{DownloadOptions, TimeRange};
    use crate::downloader::testing::{
        wait_done, wait_phase, wait_until, CopyEncoder, MockSource, StallingEncoder,
    };
    use crate::downloader::{Phase, ProgressState, TaskOutcome, TriState};
    use crate::events::TaskEvent;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_config(f: impl FnOnce(&mut AppConfig)) -> AppConfig {
        let mut config = AppConfig::default();
        config.download.wait_refresh_interval_ms = 10;
        config.download.encode_cancel_grace_secs = 1;
        config.retry.initial_delay_ms = 1;
        config.retry.max_delay_ms = 5;
        config.shutdown.force_grace_secs = 1;
        f(&mut config);
        config
    }

    fn manager(
        source: &MockSource,
        encoder: Arc<dyn Encoder>,
        f: impl FnOnce(&mut AppConfig),
    ) -> DownloadManager {
        DownloadManager::new(&test_config(f), Arc::new(source.clone()), encoder)
    }

    fn phases(rx: &mut UnboundedReceiver<TaskEvent>) -> Vec<Phase> {
        let mut phases: Vec<Phase> = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Some(phase) = event.phase() {
                if phases.last() != Some(&phase) {
                    phases.push(phase);
                }
            }
        }
        phases
    }

    #[tokio::test]
    async fn test_pool_of_one_second_video_waits() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(20)).with_delay(10);
        let mgr = manager(&source, Arc::new(CopyEncoder::default()), |c| {
            c.download.video_pool_size = 1
        });

        let a = mgr.get(&mgr.create(video_info(dir.path().join("a.mp4"), 120)).unwrap()).unwrap();
        let b = mgr.get(&mgr.create(video_info(dir.path().join("b.mp4"), 120)).unwrap()).unwrap();
        let mut a_events = a.subscribe();
        let mut b_events = b.subscribe();

        wait_phase(&a, Phase::Downloading).await;
        let waiting = wait_until(&b, |s| s.waiting.is_some()).await;
        assert_eq!(waiting.phase, Phase::Waiting);
        let info = waiting.waiting.unwrap();
        assert_eq!((info.position, info.max_slots), (1, 1));
        assert_eq!(mgr.waiting_count(ContentType::Video), 1);

        let a_status = wait_done(&a).await;
        assert_eq!(a_status.outcome, Some(TaskOutcome::Completed));
        let b_status = wait_done(&b).await;
        assert_eq!(b_status.outcome, Some(TaskOutcome::Completed));

        assert_eq!(
            phases(&mut a_events),
            vec![Phase::Preparing, Phase::Downloading, Phase::Done]
        );
        assert_eq!(
            phases(&mut b_events),
            vec![Phase::Preparing, Phase::Waiting, Phase::Downloading, Phase::Done]
        );

        let output = std::fs::read(dir.path().join("a.mp4")).unwrap();
        assert_eq!(output.len(), 20 * 16);
        assert!(!dir.path().join("a.mp4.part").exists());
        assert!(!mgr.is_downloader_running());
    }

    #[tokio::test]
    async fn test_fifo_promotion_order() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(5)).with_delay(5);
        let mgr = manager(&source, Arc::new(CopyEncoder::default()), |c| {
            c.download.video_pool_size = 1
        });

        let paths: Vec<_> = ["a.mp4", "b.mp4", "c.mp4"]
            .iter()
            .map(|name| dir.path().join(name))
            .collect();
        for path in &paths {
            mgr.create(video_info(path, 60)).unwrap();
        }

        assert!(mgr.wait_all(Duration::from_secs(10)).await);
        assert_eq!(source.opened(), paths);
        assert_eq!(source.max_active(), 1);
        let ids: Vec<_> = mgr.tasks().iter().map(|t| t.info().output_path.clone()).collect();
        assert_eq!(ids, paths);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fifo_promotion_order_across_threads() {
        for _ in 0..10 {
            let dir = TempDir::new().unwrap();
            let source = MockSource::new(Some(2));
            let mgr = manager(&source, Arc::new(CopyEncoder::default()), |c| {
                c.download.video_pool_size = 1
            });

            // 每个任务的输出目录都需要创建，目录创建的完成顺序不固定
            let paths: Vec<_> = (0..8)
                .map(|i| dir.path().join(format!("d{}", i)).join("nested").join("v.mp4"))
                .collect();
            for path in &paths {
                mgr.create(video_info(path, 60)).unwrap();
            }

            assert!(mgr.wait_all(Duration::from_secs(10)).await);
            assert_eq!(source.opened(), paths);
            assert_eq!(source.max_active(), 1);
        }
    }

    #[tokio::test]
    async fn test_prioritized_task_goes_ahead() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(1000)).with_delay(5);
        let mgr = manager(&source, Arc::new(CopyEncoder::default()), |c| {
            c.download.clip_pool_size = 1
        });

        let a = mgr.get(&mgr.create(clip_info(dir.path().join("a.mp4"))).unwrap()).unwrap();
        let b = mgr.get(&mgr.create(clip_info(dir.path().join("b.mp4"))).unwrap()).unwrap();
        let urgent = clip_info(dir.path().join("c.mp4")).with_options(DownloadOptions {
            prioritize: true,
            ..Default::default()
        });
        let c = mgr.get(&mgr.create(urgent).unwrap()).unwrap();

        wait_phase(&a, Phase::Downloading).await;
        let c_wait = wait_until(&c, |s| s.waiting.is_some()).await.waiting.unwrap();
        let b_wait = wait_until(&b, |s| s.waiting.map_or(false, |w| w.position == 2)).await;
        assert_eq!(c_wait.position, 1);
        assert_eq!(b_wait.waiting.unwrap().position, 2);

        assert!(mgr.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_never_downloads() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(1000)).with_delay(5);
        let mgr = manager(&source, Arc::new(CopyEncoder::default()), |c| {
            c.download.video_pool_size = 1
        });

        let a = mgr.get(&mgr.create(video_info(dir.path().join("a.mp4"), 60)).unwrap()).unwrap();
        let b_path = dir.path().join("b.mp4");
        let b = mgr.get(&mgr.create(video_info(&b_path, 60)).unwrap()).unwrap();
        let mut b_events = b.subscribe();

        wait_phase(&b, Phase::Waiting).await;
        mgr.cancel(b.id()).unwrap();
        let status = wait_done(&b).await;
        assert_eq!(status.outcome, Some(TaskOutcome::Canceled));
        assert!(status.error.is_none());
        assert_eq!(status.terminate_state, TriState::True);

        let seen = phases(&mut b_events);
        assert!(!seen.contains(&Phase::Downloading));
        assert_eq!(mgr.waiting_count(ContentType::Video), 0);

        mgr.cancel(a.id()).unwrap();
        wait_done(&a).await;
        assert!(!source.opened().contains(&b_path));
        assert!(!dir.path().join("a.mp4.part").exists());
    }

    #[tokio::test]
    async fn test_cancel_during_encoding_discards_artifacts() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(3));
        let mgr = manager(&source, Arc::new(StallingEncoder), |_| {});

        let output = dir.path().join("cropped.mp4");
        let info = video_info(&output, 120).with_range(TimeRange::from_seconds(Some(30), Some(90)));
        assert_eq!(info.duration_seconds(), Some(60.0));
        let raw = info.raw_path();
        let task = mgr.get(&mgr.create(info).unwrap()).unwrap();

        wait_phase(&task, Phase::Encoding).await;
        assert!(raw.exists());
        assert!(matches!(mgr.pause(task.id()), Err(EngineError::InvalidState(_))));
        // 编码开始后不再占用槽位
        assert_eq!(mgr.active_count(ContentType::Video), 0);

        mgr.cancel(task.id()).unwrap();
        let status = wait_done(&task).await;
        assert_eq!(status.outcome, Some(TaskOutcome::Canceled));
        assert!(status.error.is_none());
        assert!(!output.exists());
        assert!(!raw.exists());
    }

    #[tokio::test]
    async fn test_keep_raw_on_encode_cancel() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(3)).segmented();
        let mgr = manager(&source, Arc::new(StallingEncoder), |c| {
            c.download.keep_raw_on_encode_cancel = true
        });

        let output = dir.path().join("clip.mp4");
        let info = clip_info(&output);
        let raw = info.raw_path();
        let task = mgr.get(&mgr.create(info).unwrap()).unwrap();

        wait_phase(&task, Phase::Encoding).await;
        mgr.cancel(task.id()).unwrap();
        wait_done(&task).await;
        assert!(!output.exists());
        assert!(raw.exists());
    }

    #[tokio::test]
    async fn test_remove_rules() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(1000)).with_delay(5);
        let mgr = manager(&source, Arc::new(CopyEncoder::default()), |_| {});

        let id = mgr.create(video_info(dir.path().join("a.mp4"), 60)).unwrap();
        assert!(matches!(mgr.remove(&id), Err(EngineError::InvalidState(_))));

        mgr.cancel(&id).unwrap();
        wait_done(&mgr.get(&id).unwrap()).await;
        mgr.remove(&id).unwrap();
        assert!(matches!(mgr.get(&id), Err(EngineError::NotFound(_))));
        assert!(matches!(mgr.remove(&id), Err(EngineError::NotFound(_))));
        assert!(matches!(mgr.cancel("missing"), Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_stream_stop_keeps_recording() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(None).with_delay(2).segmented();
        let encoder = Arc::new(CopyEncoder::default());
        let mgr = manager(&source, encoder.clone(), |_| {});

        let output = dir.path().join("live.ts");
        let task = mgr.get(&mgr.create(stream_info(&output)).unwrap()).unwrap();
        assert!(matches!(task.pause(), Err(EngineError::InvalidState(_))));

        wait_phase(&task, Phase::Downloading).await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let ProgressState::Stream { seconds, .. } = task.progress() {
                if seconds >= 4.0 {
                    break;
                }
            }
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        task.cancel().unwrap();
        let status = wait_done(&task).await;
        assert_eq!(status.outcome, Some(TaskOutcome::Stopped));
        assert!(status.error.is_none());
        assert!(!status.download_skipped);
        assert!(output.exists());
        assert!(!dir.path().join("live.ts.part").exists());
        let jobs = encoder.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].duration_seconds.unwrap() >= 4.0);
    }

    #[tokio::test]
    async fn test_stream_stopped_without_data_is_skipped() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(None).with_delay(500);
        let encoder = Arc::new(CopyEncoder::default());
        let mgr = manager(&source, encoder.clone(), |_| {});

        let output = dir.path().join("offline.ts");
        let task = mgr.get(&mgr.create(stream_info(&output)).unwrap()).unwrap();
        let mut events = task.subscribe();

        wait_phase(&task, Phase::Downloading).await;
        task.cancel().unwrap();
        let status = wait_done(&task).await;

        assert_eq!(status.outcome, Some(TaskOutcome::Stopped));
        assert!(status.download_skipped);
        assert!(status.error.is_none());
        assert_eq!(
            phases(&mut events),
            vec![Phase::Preparing, Phase::Downloading, Phase::Encoding, Phase::Done]
        );
        // 后处理照常执行，但不保留空文件
        assert_eq!(encoder.jobs.lock().unwrap().len(), 1);
        assert!(!output.exists());
        assert!(!dir.path().join("offline.ts.part").exists());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(4)).with_transient_failures(3);
        let mgr = manager(&source, Arc::new(CopyEncoder::default()), |_| {});

        let task = mgr.get(&mgr.create(clip_info(dir.path().join("c.mp4"))).unwrap()).unwrap();
        let status = wait_done(&task).await;
        assert_eq!(status.outcome, Some(TaskOutcome::Completed));
        assert_eq!(task.progress(), ProgressState::clip(64, 64));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_with_network_error() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(4)).with_transient_failures(100);
        let mgr = manager(&source, Arc::new(CopyEncoder::default()), |c| {
            c.retry.max_attempts = 3
        });

        let output = dir.path().join("c.mp4");
        let task = mgr.get(&mgr.create(clip_info(&output)).unwrap()).unwrap();
        let status = wait_done(&task).await;
        assert_eq!(status.outcome, Some(TaskOutcome::Failed));
        assert!(matches!(status.error, Some(ErrorKind::NetworkError(_))));
        assert!(!dir.path().join("c.mp4.part").exists());
    }

    #[tokio::test]
    async fn test_apply_restriction_aborts_matching_tasks() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(1000)).with_delay(5);
        let mgr = manager(&source, Arc::new(CopyEncoder::default()), |_| {});

        let v1 = mgr.create(video_info(dir.path().join("v1.mp4"), 60)).unwrap();
        let v2 = mgr.create(video_info(dir.path().join("v2.mp4"), 60)).unwrap();
        let clip = mgr.create(clip_info(dir.path().join("c.mp4"))).unwrap();
        wait_phase(&mgr.get(&v1).unwrap(), Phase::Downloading).await;

        let restriction = RestrictedContent::new(
            RestrictionScope::ContentType(ContentType::Video),
            channel(),
            "owner_request",
        )
        .with_message("videos are restricted");
        let mut affected = mgr.apply_restriction(&restriction);
        affected.sort();
        let mut expected = vec![v1.clone(), v2.clone()];
        expected.sort();
        assert_eq!(affected, expected);

        for id in [&v1, &v2] {
            let status = wait_done(&mgr.get(id).unwrap()).await;
            assert_eq!(status.outcome, Some(TaskOutcome::Failed));
            assert_eq!(
                status.error,
                Some(ErrorKind::RestrictedContent(restriction.clone()))
            );
        }
        assert!(!mgr.get(&clip).unwrap().is_terminal());
        assert!(mgr.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_restriction_reported_by_source() {
        let dir = TempDir::new().unwrap();
        let restriction =
            RestrictedContent::new(RestrictionScope::Channel, channel(), "suspended");
        let source = MockSource::new(Some(3)).with_restriction(restriction.clone());
        let mgr = manager(&source, Arc::new(CopyEncoder::default()), |_| {});

        let task = mgr.get(&mgr.create(video_info(dir.path().join("v.mp4"), 60)).unwrap()).unwrap();
        let status = wait_done(&task).await;
        assert_eq!(status.error, Some(ErrorKind::RestrictedContent(restriction)));
        assert_eq!(status.error.unwrap().reason_key(), "restricted-content");
    }

    #[tokio::test]
    async fn test_update_track_probes_for_new_segments() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(3)).with_updates(vec![2, 0]);
        let encoder = Arc::new(CopyEncoder::default());
        let mgr = manager(&source, encoder.clone(), |_| {});

        let info = video_info(dir.path().join("vod.mp4"), 600).with_options(DownloadOptions {
            update_track: true,
            ..Default::default()
        });
        let task = mgr.get(&mgr.create(info).unwrap()).unwrap();
        let mut events = task.subscribe();

        let status = wait_done(&task).await;
        assert_eq!(status.outcome, Some(TaskOutcome::Completed));
        assert!(status.update_found);
        assert_eq!(
            phases(&mut events),
            vec![
                Phase::Preparing,
                Phase::Downloading,
                Phase::Updating,
                Phase::Downloading,
                Phase::Updating,
                Phase::Encoding,
                Phase::Done
            ]
        );
        match task.progress() {
            ProgressState::Video {
                downloaded_segments,
                total_segments,
                time_progress,
                ..
            } => {
                assert_eq!((downloaded_segments, total_segments), (5, 5));
                assert_eq!(time_progress, 100.0);
            }
            other => panic!("unexpected progress: {:?}", other),
        }
        assert_eq!(encoder.jobs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pause_and_resume_video() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(40)).with_delay(5);
        let mgr = manager(&source, Arc::new(CopyEncoder::default()), |_| {});

        let task = mgr.get(&mgr.create(video_info(dir.path().join("v.mp4"), 60)).unwrap()).unwrap();
        wait_phase(&task, Phase::Downloading).await;

        mgr.pause(task.id()).unwrap();
        assert_eq!(task.status().pause_state, TriState::Processing);
        wait_until(&task, |s| s.pause_state == TriState::True).await;

        let frozen = task.progress();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(task.progress(), frozen);

        mgr.resume(task.id()).unwrap();
        wait_until(&task, |s| s.pause_state == TriState::False).await;
        let status = wait_done(&task).await;
        assert_eq!(status.outcome, Some(TaskOutcome::Completed));
    }

    #[tokio::test]
    async fn test_cancel_while_paused() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(1000)).with_delay(5);
        let mgr = manager(&source, Arc::new(CopyEncoder::default()), |_| {});

        let task = mgr.get(&mgr.create(video_info(dir.path().join("v.mp4"), 60)).unwrap()).unwrap();
        wait_phase(&task, Phase::Downloading).await;
        task.pause().unwrap();
        wait_until(&task, |s| s.is_paused()).await;

        task.cancel().unwrap();
        let status = wait_done(&task).await;
        assert_eq!(status.outcome, Some(TaskOutcome::Canceled));
        assert_eq!(status.pause_state, TriState::False);
    }

    #[tokio::test]
    async fn test_set_pool_limit_promotes_waiters() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(1000)).with_delay(5);
        let mgr = manager(&source, Arc::new(CopyEncoder::default()), |c| {
            c.download.video_pool_size = 1
        });

        let a = mgr.get(&mgr.create(video_info(dir.path().join("a.mp4"), 60)).unwrap()).unwrap();
        let b = mgr.get(&mgr.create(video_info(dir.path().join("b.mp4"), 60)).unwrap()).unwrap();
        wait_phase(&b, Phase::Waiting).await;

        assert!(matches!(
            mgr.set_pool_limit(ContentType::Video, 0),
            Err(EngineError::InvalidInfo(_))
        ));
        mgr.set_pool_limit(ContentType::Video, 2).unwrap();
        assert_eq!(mgr.pool_limit(ContentType::Video), 2);
        wait_phase(&b, Phase::Downloading).await;
        assert_eq!(a.status().phase, Phase::Downloading);
        assert_eq!(mgr.active_count(ContentType::Video), 2);

        assert!(mgr.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_waits() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(Some(1000)).with_delay(5);
        let mgr = manager(&source, Arc::new(CopyEncoder::default()), |_| {});

        mgr.create(video_info(dir.path().join("a.mp4"), 60)).unwrap();
        mgr.create(clip_info(dir.path().join("b.mp4"))).unwrap();
        assert!(mgr.is_downloader_running());
        assert!(!mgr.is_shutting_down());

        assert!(mgr.shutdown(Duration::from_secs(5)).await);
        assert!(mgr.is_shutting_down());
        assert!(!mgr.begin_shutdown());
        assert!(!mgr.is_downloader_running());
        for task in mgr.tasks() {
            assert_eq!(task.status().outcome, Some(TaskOutcome::Canceled));
        }
        assert!(matches!(
            mgr.create(clip_info(dir.path().join("c.mp4"))),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_forces_stalled_encoding() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(None).with_delay(2).segmented();
        let mgr = manager(&source, Arc::new(StallingEncoder), |_| {});

        let task = mgr.get(&mgr.create(stream_info(dir.path().join("live.ts"))).unwrap()).unwrap();
        wait_phase(&task, Phase::Downloading).await;
        task.cancel().unwrap();
        wait_phase(&task, Phase::Encoding).await;

        // 停止录制后的保存不受 cancel_all 影响，超时后被强制终止
        assert!(mgr.shutdown(Duration::from_millis(100)).await);
        let status = task.status();
        assert_eq!(status.outcome, Some(TaskOutcome::Canceled));
        assert!(!dir.path().join("live.ts").exists());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_info() {
        let source = MockSource::new(Some(1));
        let mgr = manager(&source, Arc::new(CopyEncoder::default()), |_| {});
        let info = clip_info("/tmp/c.mp4").with_range(TimeRange::from_seconds(Some(5), None));
        assert!(matches!(mgr.create(info), Err(EngineError::InvalidInfo(_))));
        assert!(mgr.tasks().is_empty());
    }
}
