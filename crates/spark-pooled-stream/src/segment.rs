use bytes::BytesMut;

/// `Segment` 是从 [`SegmentPool`](crate::SegmentPool) 租借的一块定长字节缓冲。
///
/// # 设计动机（Why）
/// - 段是内存流逻辑地址空间中的一个固定窗口，同一时刻只能属于一个段表；
/// - 归还以所有权建模：`Segment` 不实现 `Clone`，[`SegmentPool::reclaim`](crate::SegmentPool::reclaim)
///   按值接收，归还之后句柄即被消耗，重复归还在类型层面不可表达，无需额外的关闭标记。
///
/// # 结构设计（How）
/// - 以 `bytes::BytesMut` 承载底层内存，`len()` 恒等于租借时请求的段大小；
/// - 池在复用时可能交出容量更大的块，多余部分只作为容量保留，不暴露给读写路径。
///
/// # 契约说明（What）
/// - **前置条件**：只有池实现通过 [`Segment::from_block`] 构造段，并保证块长度已调整为段大小；
/// - **后置条件**：[`as_slice`](Self::as_slice)/[`as_mut_slice`](Self::as_mut_slice) 始终返回恰好 `len()` 字节；
///   段内容在复用时可能残留上一个租户的数据，是否清零由使用方决定。
#[derive(Debug)]
pub struct Segment {
    block: BytesMut,
}

impl Segment {
    /// 使用池分配或复用的内存块构造段。
    ///
    /// 调用方需确保 `block.len()` 已经等于目标段大小。
    pub fn from_block(block: BytesMut) -> Self {
        Self { block }
    }

    /// 段的可用字节数。
    pub fn len(&self) -> usize {
        self.block.len()
    }

    /// 段是否为空；合法的池不会产出空段。
    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }

    /// 底层内存块的容量，池据此决定能否复用。
    pub fn block_capacity(&self) -> usize {
        self.block.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.block
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.block
    }

    /// 消耗段并交出底层内存块，供池放回自由链表。
    pub fn into_block(self) -> BytesMut {
        self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_exactly_the_block_length() {
        let mut block = BytesMut::with_capacity(32);
        block.resize(8, 0);
        let mut segment = Segment::from_block(block);
        assert_eq!(segment.len(), 8);
        assert!(segment.block_capacity() >= 32);
        segment.as_mut_slice()[7] = 0xAB;
        assert_eq!(segment.as_slice()[7], 0xAB);
        assert_eq!(segment.into_block().len(), 8);
    }
}
