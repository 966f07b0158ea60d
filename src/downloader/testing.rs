//! 测试用的数据源与编码器

use crate::downloader::error::{EncodeError, RestrictedContent, SourceError};
use crate::downloader::info::{ContentType, DownloadInfo};
use crate::downloader::source::{
    Acquisition, AcquisitionPlan, Chunk, EncodeJob, EncodeProgress, Encoder, MediaSource,
};
use crate::downloader::status::{Phase, StatusState};
use crate::downloader::task::DownloadTask;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MockState {
    /// 打开顺序（输出路径）
    opened: Mutex<Vec<PathBuf>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    transient_failures: AtomicU32,
    fatal_opens: AtomicU32,
    restriction: Mutex<Option<RestrictedContent>>,
    updates: Mutex<VecDeque<u64>>,
}

/// 可配置的模拟数据源
#[derive(Clone)]
pub(crate) struct MockSource {
    /// 每次采集的块数，`None` 表示无限（直播）
    chunks: Option<u64>,
    chunk_delay: Duration,
    chunk_size: usize,
    segmented: bool,
    state: Arc<MockState>,
}

impl MockSource {
    pub(crate) fn new(chunks: Option<u64>) -> Self {
        Self {
            chunks,
            chunk_delay: Duration::from_millis(1),
            chunk_size: 16,
            segmented: false,
            state: Arc::new(MockState::default()),
        }
    }

    pub(crate) fn with_delay(mut self, millis: u64) -> Self {
        self.chunk_delay = Duration::from_millis(millis);
        self
    }

    pub(crate) fn segmented(mut self) -> Self {
        self.segmented = true;
        self
    }

    /// 前 n 次拉取返回可重试错误
    pub(crate) fn with_transient_failures(self, n: u32) -> Self {
        self.state.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// 前 n 次打开返回不可重试错误
    pub(crate) fn with_fatal_opens(self, n: u32) -> Self {
        self.state.fatal_opens.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_restriction(self, restriction: RestrictedContent) -> Self {
        *self.state.restriction.lock().unwrap() = Some(restriction);
        self
    }

    /// 每次检查更新依次返回的新增片段数
    pub(crate) fn with_updates(self, updates: Vec<u64>) -> Self {
        *self.state.updates.lock().unwrap() = updates.into();
        self
    }

    pub(crate) fn opened(&self) -> Vec<PathBuf> {
        self.state.opened.lock().unwrap().clone()
    }

    pub(crate) fn max_active(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for MockSource {
    async fn open(&self, info: &DownloadInfo) -> Result<Box<dyn Acquisition>, SourceError> {
        if let Some(r) = self.state.restriction.lock().unwrap().clone() {
            return Err(SourceError::Restricted(r));
        }
        let fatal = self.state.fatal_opens.load(Ordering::SeqCst);
        if fatal > 0 {
            self.state.fatal_opens.store(fatal - 1, Ordering::SeqCst);
            return Err(SourceError::fatal("HTTP 404"));
        }

        self.state
            .opened
            .lock()
            .unwrap()
            .push(info.output_path().to_path_buf());
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(active, Ordering::SeqCst);

        let content_type = info.content_type();
        let plan = AcquisitionPlan {
            segmented: self.segmented,
            total_segments: match content_type {
                ContentType::Video => self.chunks,
                _ => None,
            },
            total_bytes: match content_type {
                ContentType::Clip => self.chunks.map(|c| c * self.chunk_size as u64),
                _ => None,
            },
        };
        Ok(Box::new(MockAcquisition {
            remaining: self.chunks,
            delay: self.chunk_delay,
            chunk_size: self.chunk_size,
            plan,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockAcquisition {
    remaining: Option<u64>,
    delay: Duration,
    chunk_size: usize,
    plan: AcquisitionPlan,
    state: Arc<MockState>,
}

impl Drop for MockAcquisition {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Acquisition for MockAcquisition {
    fn plan(&self) -> AcquisitionPlan {
        self.plan
    }

    async fn next_chunk(&mut self) -> Result<Option<Chunk>, SourceError> {
        tokio::time::sleep(self.delay).await;
        let failures = self.state.transient_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.state
                .transient_failures
                .store(failures - 1, Ordering::SeqCst);
            return Err(SourceError::transient("connection reset"));
        }
        match self.remaining {
            Some(0) => Ok(None),
            Some(n) => {
                self.remaining = Some(n - 1);
                Ok(Some(Chunk::new(vec![7u8; self.chunk_size], 2.0)))
            }
            None => Ok(Some(Chunk::new(vec![7u8; self.chunk_size], 2.0))),
        }
    }

    async fn poll_updates(&mut self) -> Result<u64, SourceError> {
        let found = self.state.updates.lock().unwrap().pop_front().unwrap_or(0);
        if found > 0 {
            self.remaining = Some(self.remaining.unwrap_or(0) + found);
        }
        Ok(found)
    }
}

/// 复制输入到输出的编码器
#[derive(Default)]
pub(crate) struct CopyEncoder {
    pub(crate) jobs: Mutex<Vec<EncodeJob>>,
}

#[async_trait]
impl Encoder for CopyEncoder {
    async fn transcode(
        &self,
        job: EncodeJob,
        progress: EncodeProgress,
        _cancel: CancellationToken,
    ) -> Result<(), EncodeError> {
        progress(50.0);
        tokio::fs::copy(&job.input, &job.output).await?;
        progress(100.0);
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

/// 写入部分输出后一直等待，直到被取消
#[derive(Default)]
pub(crate) struct StallingEncoder;

#[async_trait]
impl Encoder for StallingEncoder {
    async fn transcode(
        &self,
        job: EncodeJob,
        progress: EncodeProgress,
        cancel: CancellationToken,
    ) -> Result<(), EncodeError> {
        tokio::fs::write(&job.output, b"partial").await?;
        progress(10.0);
        cancel.cancelled().await;
        Err(EncodeError::Aborted)
    }
}

/// 轮询等待任务满足条件
pub(crate) async fn wait_until(task: &DownloadTask, pred: impl Fn(&StatusState) -> bool) -> StatusState {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = task.status();
        if pred(&status) {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "等待超时，当前状态: {:?}",
            status
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

pub(crate) async fn wait_phase(task: &DownloadTask, phase: Phase) -> StatusState {
    wait_until(task, |s| s.phase == phase).await
}

pub(crate) async fn wait_done(task: &DownloadTask) -> StatusState {
    tokio::time::timeout(Duration::from_secs(10), task.wait_done())
        .await
        .expect("任务未在超时内结束");
    task.status()
}
