//! `pool_contract` 集成测试：验证 `SlabSegmentPool` 在真实调用路径下的契约执行情况。
//!
//! # 测试目标（Why）
//! - 保障段租借、归还、统计等核心流程能在 crate 公开 API 下正确协作；
//! - 通过外部 crate 视角模拟用户调用，避免依赖内部实现细节；
//! - 多个流并发共享同一个池是主要使用形态，需要验证计数在并发下不漂移。
//!
//! # 结构安排（How）
//! - `stats_track_rent_and_reclaim_lifecycle`：逐步检查统计快照；
//! - `shrink_to_fit_releases_cached_segments`：自由链表收缩；
//! - `concurrent_streams_share_one_pool`：多线程下每个段恰好归还一次；
//! - `exhausted_pool_fails_the_write`：租借上限转化为写入错误。

use std::{sync::Arc, thread};

use spark_pooled_stream::{
    PoolError, PooledMemoryStream, SegmentPool, SlabPoolConfig, SlabSegmentPool, StreamError,
};

/// 通过两轮租借 / 归还验证统计字段的生命周期演进。
///
/// # 核心关注点
/// - `active_leases`：租借过程中的实时活跃数量；
/// - `total_rents` / `total_reclaims`：累计租借与归还次数；
/// - `pool_misses`：首次租借必然未命中，第二次应命中自由链表。
#[test]
fn stats_track_rent_and_reclaim_lifecycle() {
    let pool = SlabSegmentPool::new();
    let initial = pool.statistics();
    assert_eq!(initial.total_rents, 0);
    assert_eq!(initial.pool_misses, 0);

    let first = pool.rent(32).expect("首次租借失败");
    let during_first = pool.statistics();
    assert_eq!(during_first.active_leases, 1);
    assert_eq!(during_first.pool_misses, 1);
    assert!(during_first.allocated_bytes >= 32);
    pool.reclaim(first);

    let after_first = pool.statistics();
    assert_eq!(after_first.active_leases, 0);
    assert_eq!(after_first.total_reclaims, 1);
    assert_eq!(after_first.free_segments, 1);

    let second = pool.rent(32).expect("第二次租借失败");
    let during_second = pool.statistics();
    assert_eq!(during_second.total_rents, 2);
    assert_eq!(during_second.pool_misses, 1, "相同大小的租借应命中自由链表");
    assert_eq!(during_second.free_segments, 0);
    pool.reclaim(second);

    let after_second = pool.statistics();
    assert_eq!(after_second.active_leases, 0);
    assert_eq!(after_second.total_reclaims, 2);
}

/// 验证 `shrink_to_fit` 能够释放自由链表缓存并刷新统计。
#[test]
fn shrink_to_fit_releases_cached_segments() {
    let pool = SlabSegmentPool::new();
    let segment = pool.rent(48).expect("初次租借失败");
    let cached_capacity = segment.block_capacity();
    pool.reclaim(segment);

    let reclaimed = pool.shrink_to_fit();
    assert!(
        reclaimed >= cached_capacity,
        "回收字节数至少应覆盖已缓存容量"
    );
    let stats = pool.statistics();
    assert_eq!(stats.available_bytes, 0, "收缩后不应保留闲置容量");
    assert_eq!(stats.free_segments, 0);
}

/// 多个线程各自持有独立的流，共享同一个池。
///
/// # 测试意图（Why）
/// - 池的并发安全由池自身保证；若计数存在竞态，`active_leases` 不会回到 0，
///   `total_rents` 与 `total_reclaims` 也会出现偏差。
///
/// # 契约校验（What）
/// - 全部流关闭后活跃租约为 0；
/// - 累计租借数等于累计归还数，即每个段恰好归还一次。
#[test]
fn concurrent_streams_share_one_pool() {
    let pool = SlabSegmentPool::new();
    let workers: Vec<_> = (0..8u8)
        .map(|seed| {
            let shared: Arc<dyn SegmentPool> = Arc::new(pool.clone());
            thread::spawn(move || {
                for round in 0..50u32 {
                    let len = 1 + (round as usize * 37 + seed as usize * 11) % 300;
                    let payload: Vec<u8> = (0..len).map(|i| (i as u8) ^ seed).collect();
                    let mut stream = PooledMemoryStream::with_segment_size(Arc::clone(&shared), 64)
                        .expect("段大小合法");
                    stream.write(&payload).expect("写入不应失败");
                    assert_eq!(stream.to_vec(), payload);
                    stream.close();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("工作线程不应 panic");
    }

    let stats = pool.statistics();
    assert_eq!(stats.active_leases, 0);
    assert_eq!(stats.total_rents, stats.total_reclaims);
    assert!(
        stats.pool_misses < stats.total_rents,
        "复用路径应当生效，未命中数必须小于租借数"
    );
}

/// 租借上限耗尽后写入失败，已写入的部分保持有效。
#[test]
fn exhausted_pool_fails_the_write() {
    let pool = SlabSegmentPool::with_config(&SlabPoolConfig {
        max_leased_segments: Some(2),
        max_retained_segments: None,
    });
    let mut stream =
        PooledMemoryStream::with_segment_size(Arc::new(pool.clone()), 4).expect("段大小合法");

    let err = stream.write(b"0123456789").expect_err("第三段租借应失败");
    assert!(matches!(
        err,
        StreamError::Pool(PoolError::Exhausted { limit: 2 })
    ));
    assert_eq!(stream.len(), 8, "前两段写入的数据保持有效");
    assert_eq!(stream.capacity(), 8);
    assert_eq!(pool.statistics().failed_rents, 1);

    stream.close();
    assert_eq!(pool.statistics().active_leases, 0);
}

/// 受限池下把长度或游标推到极远处，必须以池耗尽错误返回，而不是在段表分配上中止进程。
///
/// # 契约校验（What）
/// - `set_length(1 << 45)` 在第三次租借时失败，已租到的两段留在表中；
/// - 越界游标上的写入在清零空洞时同样以耗尽错误返回；
/// - 关闭后全部租约归还。
#[test]
fn far_growth_on_bounded_pool_reports_exhaustion() {
    let pool = SlabSegmentPool::with_config(&SlabPoolConfig {
        max_leased_segments: Some(2),
        max_retained_segments: None,
    });
    let mut stream =
        PooledMemoryStream::with_segment_size(Arc::new(pool.clone()), 1).expect("段大小合法");

    let err = stream.set_length(1u64 << 45).expect_err("第三段租借应失败");
    assert!(matches!(
        err,
        StreamError::Pool(PoolError::Exhausted { limit: 2 })
    ));
    assert_eq!(stream.segment_count(), 2);
    assert_eq!(stream.len(), 0, "失败的设置长度不应改变长度");

    stream.set_position(1u64 << 45);
    let err = stream.write(b"x").expect_err("空洞清零时租借应失败");
    assert!(matches!(
        err,
        StreamError::Pool(PoolError::Exhausted { limit: 2 })
    ));

    stream.close();
    assert_eq!(pool.statistics().active_leases, 0);
}
