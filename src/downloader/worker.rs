//! 任务工作协程
//!
//! 每个任务一个协程，按阶段推进：
//! 准备 -> (等待) -> 下载 <-> 检查更新 -> (后处理) -> 结束
//!
//! 安全点：每块数据拉取前后、重试等待期间、检查更新前后、排队等待期间。
//! 取消在安全点被观察到后，协程清理未完成文件、归还槽位，然后进入 `Done`。

use crate::config::DownloadConfig;
use crate::downloader::error::{EncodeError, ErrorKind, SourceError};
use crate::downloader::info::ContentType;
use crate::downloader::progress::ProgressState;
use crate::downloader::retry::{Backoff, RetryPolicy};
use crate::downloader::source::{
    Acquisition, AcquisitionPlan, EncodeJob, EncodeProgress, Encoder, MediaSource,
};
use crate::downloader::status::{Phase, TaskOutcome};
use crate::downloader::task::TaskShared;
use crate::downloader::task_slot_pool::{Admission, SlotPools};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 工作协程依赖
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub source: Arc<dyn MediaSource>,
    pub encoder: Arc<dyn Encoder>,
    pub pools: Arc<SlotPools>,
    pub config: Arc<DownloadConfig>,
    pub retry: RetryPolicy,
}

/// 任务结束原因
#[derive(Debug)]
enum Exit {
    Completed,
    Stopped,
    Canceled,
    Failed(ErrorKind),
}

/// 与取消/停止竞争的结果
enum Raced<T> {
    Done(Result<T, SourceError>),
    Stopped,
}

/// 下载阶段的统计
#[derive(Debug, Default)]
struct Captured {
    plan: AcquisitionPlan,
    bytes: u64,
    segments: u64,
    total_segments: u64,
    seconds: f64,
}

impl Captured {
    fn progress(&self, content_type: ContentType) -> ProgressState {
        match content_type {
            ContentType::Stream => ProgressState::stream(self.seconds, self.bytes),
            ContentType::Video => ProgressState::video(self.segments, self.total_segments),
            ContentType::Clip => {
                ProgressState::clip(self.bytes, self.plan.total_bytes.unwrap_or(0))
            }
        }
    }
}

/// 运行任务直到结束
///
/// `admission` 在任务创建时同步申请，保证排队顺序与进入准备阶段的顺序一致
pub(crate) async fn run(task: Arc<TaskShared>, ctx: WorkerContext, admission: Admission) {
    let worker = Worker { task, ctx };
    let exit = worker.drive(admission).await;

    let phase = worker.task.phase();
    worker.cleanup(&exit, phase).await;
    worker
        .ctx
        .pools
        .withdraw(worker.task.content_type(), &worker.task.id);

    let id = &worker.task.id;
    let (outcome, error) = match exit {
        Exit::Completed => {
            info!("✅ 任务完成: {}", id);
            (TaskOutcome::Completed, None)
        }
        Exit::Stopped => {
            info!("✅ 直播录制已停止并保存: {}", id);
            (TaskOutcome::Stopped, None)
        }
        Exit::Canceled => {
            info!("任务已取消: {} (阶段: {})", id, phase);
            (TaskOutcome::Canceled, None)
        }
        Exit::Failed(e) => {
            error!("任务失败: {} [{}] 阶段: {}, 错误: {}", id, e.reason_key(), phase, e);
            (TaskOutcome::Failed, Some(e))
        }
    };
    worker.task.finish(outcome, error);
}

struct Worker {
    task: Arc<TaskShared>,
    ctx: WorkerContext,
}

impl Worker {
    async fn drive(&self, admission: Admission) -> Exit {
        if let Err(exit) = self.prepare().await {
            return exit;
        }
        if let Err(exit) = self.admit(admission).await {
            return exit;
        }
        let captured = match self.download().await {
            Ok(captured) => captured,
            Err(exit) => return exit,
        };

        // 下载阶段结束即归还槽位
        self.ctx
            .pools
            .release(self.task.content_type(), &self.task.id);

        if self.needs_post_processing(&captured) {
            self.encode(&captured).await
        } else {
            self.finalize().await
        }
    }

    /// 被取消时的结束原因：有内容限制则记为失败
    fn interrupted(&self) -> Exit {
        match self.task.restriction() {
            Some(r) => Exit::Failed(ErrorKind::RestrictedContent(r)),
            None => Exit::Canceled,
        }
    }

    fn completed(&self) -> Exit {
        if self.task.stop_requested() {
            Exit::Stopped
        } else {
            Exit::Completed
        }
    }

    /// 直播未录制到数据时同样进入后处理
    fn needs_post_processing(&self, captured: &Captured) -> bool {
        captured.plan.segmented
            || self.task.info.requests_post_processing()
            || self.task.status().download_skipped
    }

    // ==================== 准备 / 排队 ====================

    async fn prepare(&self) -> Result<(), Exit> {
        if self.task.cancel.is_cancelled() {
            return Err(self.interrupted());
        }
        if let Some(parent) = self.task.info.output_path().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Exit::Failed(e.into()))?;
            }
        }
        Ok(())
    }

    async fn admit(&self, admission: Admission) -> Result<(), Exit> {
        let ct = self.task.content_type();
        let id = &self.task.id;

        if let Admission::Queued(mut granted) = admission {
            self.task.enter_phase(Phase::Waiting);
            self.task.set_waiting(self.ctx.pools.waiting_info(ct, id));

            let mut ticker = tokio::time::interval(self.ctx.config.wait_refresh_interval());
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = self.task.cancel.cancelled() => return Err(self.interrupted()),
                    result = &mut granted => {
                        if result.is_err() {
                            return Err(Exit::Failed(ErrorKind::UnknownError(
                                "槽位池已关闭".to_string(),
                            )));
                        }
                        break;
                    }
                    _ = ticker.tick() => {
                        self.task.set_waiting(self.ctx.pools.waiting_info(ct, id));
                    }
                }
            }
            debug!("等待结束，获得槽位: {}", id);
        }

        if self.task.cancel.is_cancelled() {
            return Err(self.interrupted());
        }
        Ok(())
    }

    // ==================== 下载 ====================

    async fn download(&self) -> Result<Captured, Exit> {
        let ct = self.task.content_type();
        let info = &self.task.info;
        self.task.enter_phase(Phase::Downloading);

        let raw_path = info.raw_path();
        let mut file = tokio::fs::File::create(&raw_path)
            .await
            .map_err(|e| Exit::Failed(e.into()))?;

        let mut captured = Captured::default();
        let Some(mut acquisition) = self.open().await? else {
            self.finish_capture(&mut file, &captured).await?;
            return Ok(captured);
        };
        captured.plan = acquisition.plan();
        captured.total_segments = captured.plan.total_segments.unwrap_or(0);
        info!(
            "开始下载: {} type={} 分片容器={} 总片段={:?} 总大小={:?}",
            self.task.id,
            ct,
            captured.plan.segmented,
            captured.plan.total_segments,
            captured.plan.total_bytes
        );

        loop {
            self.capture_chunks(acquisition.as_mut(), &mut file, &mut captured)
                .await?;

            if ct != ContentType::Video || !info.options.update_track || self.task.stop_requested() {
                break;
            }

            self.task.enter_phase(Phase::Updating);
            let found = self.probe_updates(acquisition.as_mut()).await?;
            if found == 0 {
                debug!("没有新增片段: {}", self.task.id);
                break;
            }
            info!("发现 {} 个新增片段: {}", found, self.task.id);
            self.task.mark_update_found();
            captured.total_segments += found;
            self.task.enter_phase(Phase::Downloading);
        }

        self.finish_capture(&mut file, &captured).await?;
        Ok(captured)
    }

    async fn finish_capture(
        &self,
        file: &mut tokio::fs::File,
        captured: &Captured,
    ) -> Result<(), Exit> {
        file.flush().await.map_err(|e| Exit::Failed(e.into()))?;
        if self.task.content_type() == ContentType::Stream && captured.bytes == 0 {
            debug!("直播未录制到数据: {}", self.task.id);
            self.task.mark_download_skipped();
        }
        self.task
            .update_progress(captured.progress(self.task.content_type()), true);
        Ok(())
    }

    /// 打开采集；直播在打开前被停止时返回 `None`
    async fn open(&self) -> Result<Option<Box<dyn Acquisition>>, Exit> {
        let mut backoff = self.ctx.retry.backoff();
        loop {
            match self.race(self.ctx.source.open(&self.task.info)).await? {
                Raced::Done(Ok(acquisition)) => return Ok(Some(acquisition)),
                Raced::Done(Err(e)) => {
                    if !self.retry_after(&mut backoff, "打开采集", e).await? {
                        return Ok(None);
                    }
                }
                Raced::Stopped => return Ok(None),
            }
        }
    }

    async fn capture_chunks(
        &self,
        acquisition: &mut dyn Acquisition,
        file: &mut tokio::fs::File,
        captured: &mut Captured,
    ) -> Result<(), Exit> {
        let ct = self.task.content_type();
        loop {
            if !self.checkpoint().await? {
                return Ok(());
            }

            let mut backoff = self.ctx.retry.backoff();
            let chunk = loop {
                match self.race(acquisition.next_chunk()).await? {
                    Raced::Done(Ok(chunk)) => break chunk,
                    Raced::Done(Err(e)) => {
                        if !self.retry_after(&mut backoff, "拉取数据", e).await? {
                            return Ok(());
                        }
                    }
                    Raced::Stopped => return Ok(()),
                }
            };
            let Some(chunk) = chunk else {
                return Ok(());
            };

            file.write_all(&chunk.data)
                .await
                .map_err(|e| Exit::Failed(e.into()))?;
            captured.bytes += chunk.data.len() as u64;
            captured.segments += 1;
            captured.seconds += chunk.media_seconds.max(0.0);
            if captured.segments > captured.total_segments && captured.plan.total_segments.is_some() {
                // 片段数超出计划，按已下载数扩充总数
                captured.total_segments = captured.segments;
            }
            self.task.update_progress(captured.progress(ct), false);
        }
    }

    async fn probe_updates(&self, acquisition: &mut dyn Acquisition) -> Result<u64, Exit> {
        let mut backoff = self.ctx.retry.backoff();
        loop {
            match self.race(acquisition.poll_updates()).await? {
                Raced::Done(Ok(found)) => return Ok(found),
                Raced::Done(Err(e)) => {
                    if !self.retry_after(&mut backoff, "检查新增片段", e).await? {
                        return Ok(0);
                    }
                }
                Raced::Stopped => return Ok(0),
            }
        }
    }

    /// 安全点：处理取消、停止和暂停；返回 false 表示应停止下载
    async fn checkpoint(&self) -> Result<bool, Exit> {
        if self.task.cancel.is_cancelled() {
            return Err(self.interrupted());
        }
        if self.task.stop_requested() {
            return Ok(false);
        }
        if self.task.pause_requested() {
            self.wait_while_paused().await?;
        }
        Ok(true)
    }

    async fn wait_while_paused(&self) -> Result<(), Exit> {
        let mut resumed = self.task.pause_watch();
        self.task.mark_paused();

        while *resumed.borrow_and_update() {
            tokio::select! {
                _ = self.task.cancel.cancelled() => return Err(self.interrupted()),
                changed = resumed.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.task.mark_resumed();
        if self.task.cancel.is_cancelled() {
            return Err(self.interrupted());
        }
        Ok(())
    }

    /// 请求与取消、停止竞争，并加上单次超时
    async fn race<T>(
        &self,
        request: impl Future<Output = Result<T, SourceError>>,
    ) -> Result<Raced<T>, Exit> {
        let timeout = self.ctx.config.chunk_timeout();
        tokio::select! {
            biased;
            _ = self.task.cancel.cancelled() => Err(self.interrupted()),
            _ = self.task.stop.cancelled() => Ok(Raced::Stopped),
            result = tokio::time::timeout(timeout, request) => Ok(Raced::Done(
                result.unwrap_or_else(|_| {
                    Err(SourceError::transient(format!("请求超时（{}s）", timeout.as_secs())))
                }),
            )),
        }
    }

    /// 处理一次请求失败
    ///
    /// 可重试且次数未用尽时等待退避后返回 true；等待期间被停止返回 false
    async fn retry_after(
        &self,
        backoff: &mut Backoff<'_>,
        what: &str,
        e: SourceError,
    ) -> Result<bool, Exit> {
        if !e.is_transient() {
            return Err(Exit::Failed(e.into()));
        }
        let Some(delay) = backoff.next_delay() else {
            warn!(
                "{}失败，已重试 {} 次，放弃: {} ({})",
                what,
                backoff.attempts(),
                self.task.id,
                e
            );
            return Err(Exit::Failed(e.into()));
        };

        warn!(
            "{}失败，{}ms 后第 {} 次重试: {} ({})",
            what,
            delay.as_millis(),
            backoff.attempts(),
            self.task.id,
            e
        );
        tokio::select! {
            biased;
            _ = self.task.cancel.cancelled() => Err(self.interrupted()),
            _ = self.task.stop.cancelled() => Ok(false),
            _ = tokio::time::sleep(delay) => Ok(true),
        }
    }

    // ==================== 后处理 ====================

    async fn encode(&self, captured: &Captured) -> Exit {
        let info = &self.task.info;
        self.task.enter_phase(Phase::Encoding);

        let job = EncodeJob {
            input: info.raw_path(),
            output: info.output_path().to_path_buf(),
            range: info.range,
            unmute: info.options.unmute_video,
            clipping_mode: info.options.clipping_mode,
            duration_seconds: info.duration_seconds().or(Some(captured.seconds)),
        };
        let shared = Arc::clone(&self.task);
        let progress: EncodeProgress =
            Box::new(move |p| shared.update_progress_with(|current| current.with_time_progress(p)));
        let abort = CancellationToken::new();

        let encoding = self.ctx.encoder.transcode(job, progress, abort.clone());
        tokio::pin!(encoding);

        let result = tokio::select! {
            result = &mut encoding => result,
            _ = self.task.cancel.cancelled() => {
                abort.cancel();
                let grace = self.ctx.config.encode_cancel_grace();
                if tokio::time::timeout(grace, &mut encoding).await.is_err() {
                    warn!("编码器未在 {}s 内退出，强制结束: {}", grace.as_secs(), self.task.id);
                }
                return self.interrupted();
            }
        };

        match result {
            Ok(()) => {
                self.task
                    .update_progress_with(|current| current.with_time_progress(100.0));
                remove_artifact(&info.raw_path()).await;
                if self.task.status().download_skipped {
                    self.discard_empty_output().await;
                }
                self.completed()
            }
            Err(EncodeError::Aborted) => {
                Exit::Failed(ErrorKind::UnknownError("编码器意外中止".to_string()))
            }
            Err(e) => Exit::Failed(e.into()),
        }
    }

    /// 没有录制到数据时不保留空的输出文件
    async fn discard_empty_output(&self) {
        let output = self.task.info.output_path();
        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() == 0 => {
                info!("直播未录制到数据，不保留空文件: {}", self.task.id);
                remove_artifact(output).await;
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("读取输出文件信息失败: {:?}, 错误: {}", output, e),
        }
    }

    /// 不需要后处理：原始数据即最终文件
    async fn finalize(&self) -> Exit {
        let info = &self.task.info;
        match tokio::fs::rename(info.raw_path(), info.output_path()).await {
            Ok(()) => self.completed(),
            Err(e) => Exit::Failed(e.into()),
        }
    }

    /// 清理未完成文件
    ///
    /// 编码阶段被终止时删除部分输出，原始数据是否保留由 `keep_raw_on_encode_cancel` 决定；
    /// 其他阶段终止时删除原始数据
    async fn cleanup(&self, exit: &Exit, phase: Phase) {
        if matches!(exit, Exit::Completed | Exit::Stopped) {
            return;
        }
        let info = &self.task.info;
        if phase == Phase::Encoding {
            remove_artifact(info.output_path()).await;
            if !self.ctx.config.keep_raw_on_encode_cancel {
                remove_artifact(&info.raw_path()).await;
            }
        } else {
            remove_artifact(&info.raw_path()).await;
        }
    }
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("已删除文件: {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("删除文件失败: {:?}, 错误: {}", path, e),
    }
}
