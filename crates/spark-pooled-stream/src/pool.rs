use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use bytes::BytesMut;
use spin::Mutex;

use crate::{config::SlabPoolConfig, error::PoolError, segment::Segment};

/// `SegmentPool` 描述内存流消费的段池能力：租借一个定长段，以及归还它。
///
/// # 设计初衷（Why）
/// - 内存流只关心“拿到一块恰好 `segment_size` 字节的内存”与“用完还回去”，
///   具体的复用策略、上限与统计属于池的职责；
/// - 多个流实例会并发地向同一个池租借与归还，因此线程安全由池实现保证，流本身不做同步。
///
/// # 契约定义（What）
/// - `rent(segment_size)`：返回 `len() == segment_size` 的 [`Segment`]；池无法满足时返回 [`PoolError`]，
///   调用方不得原地重试；
/// - `reclaim(segment)`：按值接收段，调用后段的所有权回到池；实现不得 panic，
///   因为该路径会在 `Drop` 中执行；
/// - 两个操作都应为 O(1) 摊销复杂度。
pub trait SegmentPool: Send + Sync + 'static {
    /// 租借一个段。
    fn rent(&self, segment_size: usize) -> Result<Segment, PoolError>;

    /// 归还一个段。
    fn reclaim(&self, segment: Segment);
}

/// 池的统计快照。
///
/// 所有字段都是读取瞬间的近似值，并发租借/归还期间字段之间不保证一致。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 池向堆申请过且尚未释放的总字节数。
    pub allocated_bytes: usize,
    /// 自由链表中可直接复用的字节数。
    pub available_bytes: usize,
    /// 当前处于租借状态的段数。
    pub active_leases: usize,
    /// 累计成功租借次数。
    pub total_rents: u64,
    /// 累计归还次数。
    pub total_reclaims: u64,
    /// 自由链表未命中、需要新分配的次数。
    pub pool_misses: u64,
    /// 因达到租借上限而失败的次数。
    pub failed_rents: u64,
    /// 自由链表当前长度。
    pub free_segments: usize,
}

/// `SlabSegmentPool` 提供基于自由链表（Free List）的段池实现，
/// 专注在**大量短生命周期内存流**场景下复用段内存，以减少堆分配次数。
///
/// # 模块角色（Why）
/// - 作为 [`SegmentPool`] 的默认实现，为内存流提供开箱即用的段来源；
/// - [`SlabSegmentPool::shared`] 暴露进程级共享实例，调用方无需自行管理池的生命周期。
///
/// # 核心机制（How）
/// - 内部维护 `spin::Mutex<Vec<BytesMut>>` 作为自由链表，租借时优先复用容量足够的块；
/// - `PoolMetrics` 通过原子计数跟踪分配字节、可用字节与活跃租约，支撑 [`statistics`](Self::statistics) 快照；
/// - 活跃租约计数同时承担上限判定：先以 CAS 占位，再去自由链表取块，失败路径不会泄漏计数。
///
/// # 契约说明（What）
/// - **线程安全**：共享状态全部由 `spin::Mutex` 与原子计数保护，满足 `Send + Sync + 'static`；
/// - **后置条件**：`rent` 返回的段 `len() == segment_size`，内容可能残留上一租户的数据；
/// - **上限语义**：配置了 `max_leased_segments` 时，超过上限的租借立即失败，不排队等待。
///
/// # 设计权衡（Trade-offs）
/// - 使用自旋锁而非阻塞锁：临界区只做一次 `Vec` 查找与交换，持锁时间极短；
/// - 复用时按“首个容量足够的块”选择，不做最佳适配，换取常数级的查找开销（段大小通常统一）；
/// - `shrink_to_fit` 采取“清空自由链表”的简单策略，便于在压测后快速归还峰值内存。
#[derive(Clone, Default)]
pub struct SlabSegmentPool {
    inner: Arc<PoolInner>,
}

impl SlabSegmentPool {
    /// 创建不设上限的空池。
    pub fn new() -> Self {
        Self::default()
    }

    /// 按给定约束创建池。
    pub fn with_config(config: &SlabPoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner::new(config.clone())),
        }
    }

    /// 进程级共享池，首次调用时惰性创建，之后始终返回同一实例。
    pub fn shared() -> Arc<SlabSegmentPool> {
        static SHARED: OnceLock<Arc<SlabSegmentPool>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(SlabSegmentPool::new())))
    }

    /// 清空自由链表，返回释放的字节数。
    pub fn shrink_to_fit(&self) -> usize {
        self.inner.shrink_free_list()
    }

    pub fn statistics(&self) -> PoolStats {
        self.inner.snapshot()
    }
}

impl SegmentPool for SlabSegmentPool {
    fn rent(&self, segment_size: usize) -> Result<Segment, PoolError> {
        if segment_size == 0 {
            return Err(PoolError::InvalidSegmentSize);
        }
        let block = self.inner.acquire_block(segment_size)?;
        Ok(Segment::from_block(block))
    }

    fn reclaim(&self, segment: Segment) {
        self.inner.release_block(segment.into_block());
    }
}

struct PoolInner {
    free_list: Mutex<Vec<BytesMut>>,
    metrics: PoolMetrics,
    config: SlabPoolConfig,
}

impl Default for PoolInner {
    fn default() -> Self {
        Self::new(SlabPoolConfig::default())
    }
}

impl PoolInner {
    fn new(config: SlabPoolConfig) -> Self {
        Self {
            free_list: Mutex::new(Vec::new()),
            metrics: PoolMetrics::default(),
            config,
        }
    }

    /// 占用一个租约名额后，从自由链表或堆上获取一个满足大小的块。
    fn acquire_block(&self, segment_size: usize) -> Result<BytesMut, PoolError> {
        self.metrics
            .try_increase_active_leases(self.config.max_leased_segments)
            .map_err(|limit| {
                tracing::warn!(
                    limit,
                    segment_size,
                    "段池租借失败：活跃租约已达上限"
                );
                PoolError::Exhausted { limit }
            })?;

        let reused = {
            let mut list = self.free_list.lock();
            let index = list
                .iter()
                .position(|block| block.capacity() >= segment_size);
            index.map(|index| list.swap_remove(index))
        };

        let mut block = match reused {
            Some(block) => {
                self.metrics.decrease_available(block.capacity());
                block
            }
            None => {
                let block = BytesMut::with_capacity(segment_size);
                self.metrics.increase_on_new_allocation(block.capacity());
                tracing::trace!(segment_size, "自由链表未命中，新分配段");
                block
            }
        };
        // 复用块的旧内容保留在 `len` 之内，`resize` 只为新增区间补零。
        block.truncate(segment_size);
        block.resize(segment_size, 0);
        self.metrics.total_rents.fetch_add(1, Ordering::Relaxed);
        Ok(block)
    }

    fn release_block(&self, block: BytesMut) {
        self.metrics.decrease_active_leases();
        self.metrics.total_reclaims.fetch_add(1, Ordering::Relaxed);
        let capacity = block.capacity();
        let mut list = self.free_list.lock();
        let retain = self
            .config
            .max_retained_segments
            .is_none_or(|limit| list.len() < limit);
        if retain {
            self.metrics.increase_available(capacity);
            list.push(block);
        } else {
            drop(list);
            self.metrics.decrease_on_loss(capacity);
        }
    }

    fn shrink_free_list(&self) -> usize {
        let mut list = self.free_list.lock();
        let reclaimed: usize = list.iter().map(BytesMut::capacity).sum();
        list.clear();
        self.metrics.decrease_on_shrink(reclaimed);
        reclaimed
    }

    fn snapshot(&self) -> PoolStats {
        let free_segments = self.free_list.lock().len();
        PoolStats {
            allocated_bytes: self.metrics.allocated_bytes.load(Ordering::Relaxed),
            available_bytes: self.metrics.available_bytes.load(Ordering::Relaxed),
            active_leases: self.metrics.active_leases.load(Ordering::Relaxed),
            total_rents: self.metrics.total_rents.load(Ordering::Relaxed),
            total_reclaims: self.metrics.total_reclaims.load(Ordering::Relaxed),
            pool_misses: self.metrics.pool_misses.load(Ordering::Relaxed),
            failed_rents: self.metrics.failed_rents.load(Ordering::Relaxed),
            free_segments,
        }
    }
}

#[derive(Default)]
struct PoolMetrics {
    allocated_bytes: AtomicUsize,
    available_bytes: AtomicUsize,
    active_leases: AtomicUsize,
    total_rents: AtomicU64,
    total_reclaims: AtomicU64,
    pool_misses: AtomicU64,
    failed_rents: AtomicU64,
}

impl PoolMetrics {
    fn increase_on_new_allocation(&self, capacity: usize) {
        self.allocated_bytes.fetch_add(capacity, Ordering::Relaxed);
        self.pool_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn increase_available(&self, capacity: usize) {
        self.available_bytes.fetch_add(capacity, Ordering::Relaxed);
    }

    fn decrease_available(&self, capacity: usize) {
        saturating_sub(&self.available_bytes, capacity);
    }

    fn decrease_on_loss(&self, capacity: usize) {
        saturating_sub(&self.allocated_bytes, capacity);
    }

    fn decrease_on_shrink(&self, capacity: usize) {
        self.decrease_available(capacity);
        self.decrease_on_loss(capacity);
    }

    /// 在上限内占用一个租约名额；超限时返回上限值并记录失败。
    fn try_increase_active_leases(&self, limit: Option<usize>) -> Result<(), usize> {
        let Some(limit) = limit else {
            self.active_leases.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };
        self.active_leases
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < limit).then_some(current + 1)
            })
            .map(|_| ())
            .map_err(|_| {
                self.failed_rents.fetch_add(1, Ordering::Relaxed);
                limit
            })
    }

    fn decrease_active_leases(&self) {
        saturating_sub(&self.active_leases, 1);
    }
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        Some(current.saturating_sub(value))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reclaimed_segment_is_reused() {
        let pool = SlabSegmentPool::new();
        let segment = pool.rent(64).expect("租借段失败");
        assert_eq!(segment.len(), 64);
        pool.reclaim(segment);

        let snapshot = pool.statistics();
        assert_eq!(snapshot.free_segments, 1);
        assert!(snapshot.available_bytes >= 64);

        let second = pool.rent(16).expect("复用段失败");
        assert_eq!(second.len(), 16, "复用更大的块时仍应截断到请求大小");
        let after = pool.statistics();
        assert_eq!(after.pool_misses, 1, "第二次租借应命中自由链表");
        assert_eq!(after.active_leases, 1);
        pool.reclaim(second);
    }

    #[test]
    fn lease_limit_rejects_and_recovers() {
        let pool = SlabSegmentPool::with_config(&SlabPoolConfig {
            max_leased_segments: Some(1),
            max_retained_segments: None,
        });
        let first = pool.rent(8).expect("首个租借应成功");
        assert_eq!(pool.rent(8).unwrap_err(), PoolError::Exhausted { limit: 1 });
        assert_eq!(pool.statistics().failed_rents, 1);

        pool.reclaim(first);
        let again = pool.rent(8).expect("归还后应可再次租借");
        pool.reclaim(again);
        assert_eq!(pool.statistics().active_leases, 0);
    }

    #[test]
    fn retention_limit_drops_surplus_blocks() {
        let pool = SlabSegmentPool::with_config(&SlabPoolConfig {
            max_leased_segments: None,
            max_retained_segments: Some(1),
        });
        let a = pool.rent(32).expect("租借 a");
        let b = pool.rent(32).expect("租借 b");
        pool.reclaim(a);
        pool.reclaim(b);
        let stats = pool.statistics();
        assert_eq!(stats.free_segments, 1);
        assert_eq!(stats.total_reclaims, 2);
        assert_eq!(stats.allocated_bytes, stats.available_bytes);
    }

    #[test]
    fn zero_sized_rent_is_rejected() {
        let pool = SlabSegmentPool::new();
        assert_eq!(pool.rent(0).unwrap_err(), PoolError::InvalidSegmentSize);
        assert_eq!(pool.statistics().active_leases, 0);
    }

    #[test]
    fn shared_pool_is_a_singleton() {
        let a = SlabSegmentPool::shared();
        let b = SlabSegmentPool::shared();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }
}
