use std::sync::Arc;

use crate::{error::StreamError, pool::SegmentPool, segment::Segment};

/// 段表：按顺序持有从池租借的段，覆盖内存流触达过的全部偏移。
///
/// # 教案式说明
/// - **意图 (Why)**：把“偏移 → 段”的换算与惰性租借集中在一处，读写引擎只面对连续的段窗口；
/// - **结构 (How)**：`segments[i]` 覆盖逻辑区间 `[i * S, (i + 1) * S)`；段表只追加，
///   关闭前从不收缩，也不存在空洞表示；
/// - **契约 (What)**：
///   - [`ensure_covers`](Self::ensure_covers) 之后，目标偏移所在的段必然存在；
///   - [`capacity`](Self::capacity) 恒等于 `segment_count * S`，打开期间单调不减；
///   - [`release_all`](Self::release_all) 按“最后追加者最先归还”的顺序把全部段交还给池，
///     段按值移交，同一段不可能被归还两次。
pub(crate) struct SegmentTable {
    segments: Vec<Segment>,
    segment_size: usize,
    pool: Arc<dyn SegmentPool>,
}

impl SegmentTable {
    pub(crate) fn new(pool: Arc<dyn SegmentPool>, segment_size: usize) -> Self {
        debug_assert!(segment_size > 0, "段大小已在构造流时校验");
        Self {
            segments: Vec::new(),
            segment_size,
            pool,
        }
    }

    pub(crate) fn segment_size(&self) -> usize {
        self.segment_size
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.segments.len() as u64 * self.segment_size as u64
    }

    /// 偏移所在的段下标与段内偏移。
    pub(crate) fn locate(&self, offset: u64) -> Result<(usize, usize), StreamError> {
        let size = self.segment_size as u64;
        let index = usize::try_from(offset / size)
            .map_err(|_| StreamError::OffsetOverflow { offset })?;
        // 余数严格小于段大小，必然可以放进 usize。
        Ok((index, (offset % size) as usize))
    }

    /// 确保偏移 `offset` 所在的段已经租借，返回该段下标。
    ///
    /// # 执行步骤（How）
    /// 1. 计算 `index = offset / S`；
    /// 2. 段表长度不足 `index + 1` 时逐个向池租借并追加；
    /// 3. 租借失败立即返回，已追加的段保留在表中，不做回滚；
    /// 4. 池交出短于 S 的段时把它退回池中，返回 [`StreamError::ShortSegment`]。
    ///
    /// 大偏移会逐个预租中间所有段；段表随租借逐段增长，不按目标下标预留，
    /// 受限的池因此总能先于段表分配报告耗尽。
    pub(crate) fn ensure_covers(&mut self, offset: u64) -> Result<usize, StreamError> {
        let (index, _) = self.locate(offset)?;
        let required = index
            .checked_add(1)
            .ok_or(StreamError::OffsetOverflow { offset })?;
        while self.segments.len() < required {
            let segment = self.pool.rent(self.segment_size)?;
            if segment.len() < self.segment_size {
                let actual = segment.len();
                self.pool.reclaim(segment);
                tracing::warn!(
                    expected = self.segment_size,
                    actual,
                    "段池交出的段短于请求大小，已退回"
                );
                return Err(StreamError::ShortSegment {
                    expected: self.segment_size,
                    actual,
                });
            }
            self.segments.push(segment);
            tracing::trace!(
                segment_index = self.segments.len() - 1,
                segment_size = self.segment_size,
                "租借新段"
            );
        }
        Ok(index)
    }

    pub(crate) fn segment(&self, index: usize) -> &[u8] {
        self.segments[index].as_slice()
    }

    pub(crate) fn segment_mut(&mut self, index: usize) -> &mut [u8] {
        self.segments[index].as_mut_slice()
    }

    /// 已租借段中前 `len` 字节的逐段只读视图。
    pub(crate) fn chunks(&self, len: u64) -> impl Iterator<Item = &[u8]> + '_ {
        let size = self.segment_size as u64;
        self.segments
            .iter()
            .enumerate()
            .map_while(move |(index, segment)| {
                let start = index as u64 * size;
                (start < len).then(|| {
                    let take = (len - start).min(size) as usize;
                    &segment.as_slice()[..take]
                })
            })
    }

    /// 逆序归还全部段，返回归还数量。
    pub(crate) fn release_all(&mut self) -> usize {
        let released = self.segments.len();
        while let Some(segment) = self.segments.pop() {
            self.pool.reclaim(segment);
        }
        // 关闭后不会再增长，顺带释放段表自身的容量。
        self.segments = Vec::new();
        released
    }
}
