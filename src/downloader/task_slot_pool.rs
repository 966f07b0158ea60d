//! 并发槽位池
//!
//! 每种内容类型一个独立的池，决定哪些任务可以进入下载阶段。
//! - 占用：任务进入 `Downloading` 前获取，`Encoding` 或 `Done` 前归还
//! - 等待：没有空闲槽位时按顺序排队，优先任务排在普通任务之前，同类按进入准备阶段的顺序
//! - 历史：记录最近若干次槽位占用时长，用于估算等待时间
//!
//! 所有计数只在一把互斥锁内修改，锁内不做任何等待。

use crate::downloader::info::ContentType;
use crate::downloader::status::WaitingInfo;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// 申请槽位的结果
#[derive(Debug)]
pub enum Admission {
    /// 立即获得槽位
    Granted,
    /// 已排队，槽位空出后通过通道通知
    Queued(oneshot::Receiver<()>),
}

/// 排队中的任务
#[derive(Debug)]
struct Waiter {
    task_id: String,
    /// 进入准备阶段的序号
    seq: u64,
    prioritize: bool,
    /// 进入队列的时间
    enqueued_at: Instant,
    grant: oneshot::Sender<()>,
}

impl Waiter {
    /// 排序键：优先任务在前，同类按序号
    fn key(&self) -> (bool, u64) {
        (!self.prioritize, self.seq)
    }
}

#[derive(Debug)]
struct Pool {
    max_slots: usize,
    /// 占用中的任务 -> 获取时间
    active: HashMap<String, Instant>,
    waiters: VecDeque<Waiter>,
    /// 最近的占用时长
    history: VecDeque<Duration>,
}

impl Pool {
    fn new(max_slots: usize) -> Self {
        Self {
            max_slots,
            active: HashMap::new(),
            waiters: VecDeque::new(),
            history: VecDeque::new(),
        }
    }

    fn has_free_slot(&self) -> bool {
        self.active.len() < self.max_slots
    }

    fn enqueue(&mut self, waiter: Waiter) {
        let key = waiter.key();
        let index = self
            .waiters
            .iter()
            .position(|w| w.key() > key)
            .unwrap_or(self.waiters.len());
        self.waiters.insert(index, waiter);
    }

    /// 依次唤醒排队任务直到槽位占满，返回被唤醒的任务
    fn promote(&mut self) -> Vec<String> {
        let mut promoted = Vec::new();
        while self.has_free_slot() {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            // 接收端已关闭说明任务已放弃等待
            if waiter.grant.send(()).is_ok() {
                self.active.insert(waiter.task_id.clone(), Instant::now());
                promoted.push(waiter.task_id);
            }
        }
        promoted
    }

    fn record(&mut self, held: Duration, window: usize) {
        self.history.push_back(held);
        while self.history.len() > window {
            self.history.pop_front();
        }
    }

    fn average_hold(&self) -> Option<Duration> {
        if self.history.is_empty() {
            return None;
        }
        let total: Duration = self.history.iter().sum();
        Some(total / self.history.len() as u32)
    }
}

/// 按内容类型划分的槽位池
#[derive(Debug)]
pub struct SlotPools {
    pools: Mutex<HashMap<ContentType, Pool>>,
    history_window: usize,
    default_wait: Duration,
}

impl SlotPools {
    /// `limits` 返回每种内容类型的最大并发数
    pub fn new(
        limits: impl Fn(ContentType) -> usize,
        history_window: usize,
        default_wait: Duration,
    ) -> Self {
        let pools = ContentType::ALL
            .iter()
            .map(|&ct| (ct, Pool::new(limits(ct).max(1))))
            .collect::<HashMap<_, _>>();

        for (ct, pool) in &pools {
            info!("创建槽位池: {} 最大并发数={}", ct, pool.max_slots);
        }

        Self {
            pools: Mutex::new(pools),
            history_window: history_window.max(1),
            default_wait,
        }
    }

    fn with_pool<R>(&self, content_type: ContentType, f: impl FnOnce(&mut Pool) -> R) -> R {
        let mut pools = self.pools.lock();
        let pool = pools
            .entry(content_type)
            .or_insert_with(|| Pool::new(1));
        f(pool)
    }

    /// 申请槽位
    ///
    /// 已有任务在排队时，新任务只有排在所有等待者之前（更高优先级）才能直接获得槽位
    pub fn acquire(
        &self,
        content_type: ContentType,
        task_id: &str,
        seq: u64,
        prioritize: bool,
    ) -> Admission {
        self.with_pool(content_type, |pool| {
            let ahead_of_all = pool
                .waiters
                .front()
                .map_or(true, |w| (!prioritize, seq) < w.key());

            if pool.has_free_slot() && ahead_of_all {
                pool.active.insert(task_id.to_string(), Instant::now());
                debug!(
                    "获得槽位: task={}, type={}, 占用={}/{}",
                    task_id,
                    content_type,
                    pool.active.len(),
                    pool.max_slots
                );
                return Admission::Granted;
            }

            let (tx, rx) = oneshot::channel();
            pool.enqueue(Waiter {
                task_id: task_id.to_string(),
                seq,
                prioritize,
                enqueued_at: Instant::now(),
                grant: tx,
            });
            debug!(
                "槽位已满，进入等待: task={}, type={}, 排队数={}",
                task_id,
                content_type,
                pool.waiters.len()
            );
            Admission::Queued(rx)
        })
    }

    /// 正常归还槽位（记录占用时长并唤醒等待者）
    pub fn release(&self, content_type: ContentType, task_id: &str) {
        let window = self.history_window;
        let promoted = self.with_pool(content_type, |pool| {
            if let Some(acquired_at) = pool.active.remove(task_id) {
                pool.record(acquired_at.elapsed(), window);
            }
            pool.promote()
        });
        if !promoted.is_empty() {
            debug!("槽位释放后唤醒: type={}, tasks={:?}", content_type, promoted);
        }
    }

    /// 放弃排队或归还槽位（不计入历史），可重复调用
    pub fn withdraw(&self, content_type: ContentType, task_id: &str) {
        let promoted = self.with_pool(content_type, |pool| {
            pool.waiters.retain(|w| w.task_id != task_id);
            if pool.active.remove(task_id).is_some() {
                pool.promote()
            } else {
                Vec::new()
            }
        });
        if !promoted.is_empty() {
            debug!("槽位释放后唤醒: type={}, tasks={:?}", content_type, promoted);
        }
    }

    /// 排队信息；任务不在队列中时返回 `None`
    ///
    /// 预计等待 = ceil(位置 / 最大并发数) × 平均占用时长 - 已等待时长（不低于 0）
    pub fn waiting_info(&self, content_type: ContentType, task_id: &str) -> Option<WaitingInfo> {
        let default_wait = self.default_wait;
        self.with_pool(content_type, |pool| {
            let index = pool.waiters.iter().position(|w| w.task_id == task_id)?;
            let position = index + 1;
            let rounds = position.div_ceil(pool.max_slots) as u32;
            let average = pool.average_hold().unwrap_or(default_wait);
            let waited = pool.waiters[index].enqueued_at.elapsed();
            Some(WaitingInfo {
                position,
                max_slots: pool.max_slots,
                estimated_wait: (average * rounds).saturating_sub(waited),
            })
        })
    }

    /// 调整并发数
    ///
    /// 扩容立即唤醒等待者；缩容不会中断占用中的任务，超出部分运行到结束后自然回落
    pub fn resize(&self, content_type: ContentType, new_max: usize) {
        let new_max = new_max.max(1);
        let (old_max, active, promoted) = self.with_pool(content_type, |pool| {
            let old_max = pool.max_slots;
            pool.max_slots = new_max;
            let promoted = pool.promote();
            (old_max, pool.active.len(), promoted)
        });

        if new_max == old_max {
            debug!("槽位池容量无需调整: {} {}", content_type, old_max);
        } else if new_max > old_max {
            info!(
                "✅ 槽位池扩容: {} {} -> {}，唤醒 {} 个等待任务",
                content_type,
                old_max,
                new_max,
                promoted.len()
            );
        } else if active > new_max {
            warn!(
                "槽位池缩容: {} {} -> {}（{} 个任务仍在占用，将继续运行）",
                content_type, old_max, new_max, active
            );
        } else {
            info!("槽位池缩容: {} {} -> {}", content_type, old_max, new_max);
        }
    }

    pub fn max_slots(&self, content_type: ContentType) -> usize {
        self.with_pool(content_type, |pool| pool.max_slots)
    }

    pub fn active_count(&self, content_type: ContentType) -> usize {
        self.with_pool(content_type, |pool| pool.active.len())
    }

    pub fn waiting_count(&self, content_type: ContentType) -> usize {
        self.with_pool(content_type, |pool| pool.waiters.len())
    }

    pub fn average_hold(&self, content_type: ContentType) -> Option<Duration> {
        self.with_pool(content_type, |pool| pool.average_hold())
    }
}
