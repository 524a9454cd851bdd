use std::{
    cmp,
    io::{self, Read, Seek, SeekFrom, Write},
    sync::Arc,
};

use crate::{
    config::{DEFAULT_SEGMENT_SIZE, StreamConfig},
    error::StreamError,
    pool::SegmentPool,
    table::SegmentTable,
};

/// 从上游数据源抽取时单次读取的暂存大小。
const DRAIN_CHUNK_SIZE: usize = 8 * 1024;

/// 内存流所处的生命周期阶段。
///
/// - `Open`：可读写、可扩容；
/// - `Closed`：段已全部归还，读取视为空流，拒绝任何扩容。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Closed,
}

/// `PooledMemoryStream` 是一个可增长、可随机访问的内存字节流，
/// 其存储由从段池租借的定长段拼接而成。
///
/// # 设计动机（Why）
/// - 每请求一块临时缓冲的负载下，“分配 → 拷贝 → 丢弃”会给分配器带来持续压力；
///   本类型把存储拆成固定大小的段，段从共享池租借、关闭时归还，大块堆分配只在池冷启动时发生；
/// - 对外保持普通定位流的语义（读、写、定位、设置长度），可以直接替换 `Cursor<Vec<u8>>` 一类的用法。
///
/// # 架构关系（How）
/// - `table` 持有有序段表，负责偏移换算与惰性租借；
/// - `length` 是写入或显式设置长度所确认过的最高水位，`position` 是读写游标；
/// - 读写以“最大连续块”为单位推进，每块用 `copy_from_slice` 批量拷贝，代价与搬运字节数成正比；
/// - `Drop` 在调用方忘记关闭时兜底归还段，与显式 [`close`](Self::close) 共用同一条幂等路径。
///
/// # 契约说明（What）
/// - **不变量**：操作间隙满足 `position <= len()`（除非调用方通过 [`set_position`](Self::set_position)
///   主动越界）；`capacity() >= len()` 恒成立；打开期间 `capacity()` 单调不减；
/// - **游标越界**：定位结果被钳制到 `[0, len()]`；读到末尾返回 0 而非错误；
/// - **关闭之后**：`len()`、`position()`、`capacity()` 均为 0，读取返回 0，写入与设置长度返回
///   [`StreamError::Closed`]；
/// - **线程模型**：单实例单线程使用，内部不做同步；池本身可被多个流并发共享。
///
/// # 风险与取舍（Trade-offs）
/// - 段表只增不减：截断长度不会归还段，容量一直保留到关闭；
/// - 复用段可能残留其他流的数据，凡是“未经写入就变为有效”的字节都会先被清零。
///
/// # 示例（Examples）
/// ```rust
/// use std::sync::Arc;
/// use spark_pooled_stream::{PooledMemoryStream, SlabSegmentPool};
///
/// let pool = Arc::new(SlabSegmentPool::new());
/// let mut stream = PooledMemoryStream::from_bytes(b"Lorem ipsum", pool, 4).unwrap();
/// assert_eq!(stream.capacity(), 12);
/// assert_eq!(stream.len(), 11);
///
/// let mut out = [0u8; 11];
/// assert_eq!(stream.read(&mut out), 11);
/// assert_eq!(&out, b"Lorem ipsum");
/// assert_eq!(stream.read(&mut out), 0);
/// stream.close();
/// ```
pub struct PooledMemoryStream {
    table: SegmentTable,
    length: u64,
    position: u64,
    lifecycle: Lifecycle,
}

impl PooledMemoryStream {
    /// 以默认段大小（64 KiB）创建空流；此时不租借任何段。
    pub fn new(pool: Arc<dyn SegmentPool>) -> Self {
        Self::open(pool, DEFAULT_SEGMENT_SIZE)
    }

    /// 以指定段大小创建空流，段大小为 0 时返回 [`StreamError::InvalidSegmentSize`]。
    pub fn with_segment_size(
        pool: Arc<dyn SegmentPool>,
        segment_size: usize,
    ) -> Result<Self, StreamError> {
        if segment_size == 0 {
            return Err(StreamError::InvalidSegmentSize);
        }
        Ok(Self::open(pool, segment_size))
    }

    /// 按配置创建空流。
    pub fn with_config(
        pool: Arc<dyn SegmentPool>,
        config: &StreamConfig,
    ) -> Result<Self, StreamError> {
        Self::with_segment_size(pool, config.segment_size)
    }

    /// 以已有字节序列预填充：写入全部字节后把游标倒回 0。
    pub fn from_bytes(
        bytes: &[u8],
        pool: Arc<dyn SegmentPool>,
        segment_size: usize,
    ) -> Result<Self, StreamError> {
        let mut stream = Self::with_segment_size(pool, segment_size)?;
        stream.write(bytes)?;
        stream.seek(SeekFrom::Start(0));
        Ok(stream)
    }

    /// 从可读数据源抽取全部数据直到耗尽。
    ///
    /// # 契约说明（What）
    /// - 游标停留在末尾（`position() == len()`），与“从字节序列构造”不同，调用方需要时自行倒回；
    /// - 上游返回 `Interrupted` 时原地重试，其余 I/O 错误包装为 [`StreamError::Source`]；
    ///   扩容失败保持为 [`StreamError::Pool`]。
    pub fn from_reader<R: Read>(
        mut reader: R,
        pool: Arc<dyn SegmentPool>,
        segment_size: usize,
    ) -> Result<Self, StreamError> {
        let mut stream = Self::with_segment_size(pool, segment_size)?;
        let mut chunk = vec![0u8; cmp::min(segment_size, DRAIN_CHUNK_SIZE)];
        loop {
            let read = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(StreamError::Source(err)),
            };
            stream.write(&chunk[..read])?;
        }
        Ok(stream)
    }

    fn open(pool: Arc<dyn SegmentPool>, segment_size: usize) -> Self {
        Self {
            table: SegmentTable::new(pool, segment_size),
            length: 0,
            position: 0,
            lifecycle: Lifecycle::Open,
        }
    }

    /// 逻辑长度：写入或设置长度确认过的最高水位。
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// 当前已租借段覆盖的总字节数，恒不小于 [`len`](Self::len)。
    pub fn capacity(&self) -> u64 {
        self.table.capacity()
    }

    pub fn segment_size(&self) -> usize {
        self.table.segment_size()
    }

    pub fn segment_count(&self) -> usize {
        self.table.segment_count()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// 直接设置游标，不做边界检查。
    ///
    /// 越界游标在下一次读、写或定位时才被调和：读取视为到达末尾，写入会先把
    /// `[len, position)` 清零再扩展，定位会钳制回 `[0, len]`。
    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle == Lifecycle::Closed
    }

    /// 从当前游标读取至多 `dst.len()` 字节，返回实际读取数并推进游标。
    ///
    /// # 执行逻辑（How）
    /// - 游标不小于长度时立即返回 0，读到末尾是短读信号而不是错误；
    /// - 每一步拷贝一个最大连续块，块长取以下四者的最小值：剩余请求量、目标缓冲剩余空间、
    ///   当前段剩余字节、尚未读取的有效字节（`len - position`）；
    /// - 绝不越过 `len()`，即使容量更大。
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        if self.position >= self.length {
            return 0;
        }
        let segment_size = self.table.segment_size();
        let mut copied = 0;
        while copied < dst.len() && self.position < self.length {
            // `position < length <= capacity`，游标所在的段必然已租借且下标可寻址。
            let index = (self.position / segment_size as u64) as usize;
            let offset = (self.position % segment_size as u64) as usize;
            let unread = self.length - self.position;
            let chunk = cmp::min(dst.len() - copied, segment_size - offset);
            let chunk = cmp::min(chunk as u64, unread) as usize;

            dst[copied..copied + chunk]
                .copy_from_slice(&self.table.segment(index)[offset..offset + chunk]);
            copied += chunk;
            self.position += chunk as u64;
        }
        copied
    }

    /// 读取到 `buffer[offset..offset + count]`，窗口按缓冲实际大小钳制。
    pub fn read_into(&mut self, buffer: &mut [u8], offset: usize, count: usize) -> usize {
        let start = cmp::min(offset, buffer.len());
        let end = start + cmp::min(count, buffer.len() - start);
        self.read(&mut buffer[start..end])
    }

    /// 把 `src` 全部写入当前游标处，必要时扩容并推高长度，返回写入字节数。
    ///
    /// # 执行逻辑（How）
    /// 1. 空输入直接返回，不触发任何租借；
    /// 2. 若游标被手动放到长度之后，先把 `[len, position)` 清零，避免暴露复用段中的旧数据；
    /// 3. 每块写入前调用段表的 `ensure_covers` 保证目标段存在，块长取剩余输入与当前段剩余空间的较小值；
    /// 4. 每块完成后若游标超过长度则把长度推到游标处；在已有长度内覆盖写不改变长度。
    ///
    /// # 错误（What）
    /// - 流已关闭返回 [`StreamError::Closed`]；
    /// - 扩容失败返回 [`StreamError::Pool`]，此前完成的块保持有效。
    pub fn write(&mut self, src: &[u8]) -> Result<usize, StreamError> {
        if src.is_empty() {
            return Ok(0);
        }
        self.ensure_open()?;
        if self.position > self.length {
            self.zero_fill(self.length, self.position)?;
        }

        let segment_size = self.table.segment_size();
        let mut written = 0;
        while written < src.len() {
            let index = self.table.ensure_covers(self.position)?;
            let offset = (self.position % segment_size as u64) as usize;
            let chunk = cmp::min(src.len() - written, segment_size - offset);

            self.table.segment_mut(index)[offset..offset + chunk]
                .copy_from_slice(&src[written..written + chunk]);
            written += chunk;
            self.position += chunk as u64;
            if self.position > self.length {
                self.length = self.position;
            }
        }
        Ok(written)
    }

    /// 写入 `buffer[offset..offset + count]`，窗口按源缓冲实际大小钳制。
    pub fn write_from(
        &mut self,
        buffer: &[u8],
        offset: usize,
        count: usize,
    ) -> Result<usize, StreamError> {
        let start = cmp::min(offset, buffer.len());
        let end = start + cmp::min(count, buffer.len() - start);
        self.write(&buffer[start..end])
    }

    /// 移动游标并返回新位置，结果始终钳制到 `[0, len()]`，从不失败。
    ///
    /// 定位无法进入从未写入的区域，只有写入或 [`set_length`](Self::set_length) 能扩大可达范围。
    pub fn seek(&mut self, target: SeekFrom) -> u64 {
        let (origin, delta) = match target {
            SeekFrom::Start(offset) => {
                self.position = cmp::min(offset, self.length);
                return self.position;
            }
            SeekFrom::End(delta) => (self.length, delta),
            SeekFrom::Current(delta) => (self.position, delta),
        };
        self.position = clamp_offset(origin, delta, self.length);
        self.position
    }

    /// 直接设置逻辑长度，可增长也可截断。
    ///
    /// # 契约说明（What）
    /// - 先预租到覆盖 `value` 偏移的全部段（急切增长，大值会一次性租满中间段）；
    /// - 增长部分 `[len, value)` 被清零；截断不归还段，容量保持到关闭；
    /// - 游标大于 `value` 时被钳制到 `value`；
    /// - 流已关闭返回 [`StreamError::Closed`]。
    pub fn set_length(&mut self, value: u64) -> Result<(), StreamError> {
        self.ensure_open()?;
        self.table.ensure_covers(value)?;
        if value > self.length {
            self.zero_fill(self.length, value)?;
        }
        if self.position > value {
            self.position = value;
        }
        self.length = value;
        Ok(())
    }

    /// 无后备存储，刷新是刻意保留的空操作。
    pub fn flush(&mut self) {}

    /// 倒回开头并把全部有效字节读进一块新分配的连续缓冲，游标停在末尾。
    ///
    /// 这是为需要扁平缓冲的接口准备的兼容出口：它重新引入了池化想要消除的大块分配，
    /// 能用 [`chunks`](Self::chunks) 或 [`copy_to`](Self::copy_to) 时应优先使用后两者。
    pub fn to_vec(&mut self) -> Vec<u8> {
        self.seek(SeekFrom::Start(0));
        let mut buffer = vec![0u8; self.length as usize];
        let mut filled = 0;
        while filled < buffer.len() {
            let read = self.read(&mut buffer[filled..]);
            if read == 0 {
                break;
            }
            filled += read;
        }
        buffer
    }

    /// 以逐段借用切片的方式遍历 `[0, len())`，不拷贝、不移动游标。
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.table.chunks(self.length)
    }

    /// 把 `[position, len)` 写入 `writer`，返回写出的字节数，游标推进到末尾。
    pub fn copy_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> io::Result<u64> {
        let segment_size = self.table.segment_size();
        let mut total = 0u64;
        while self.position < self.length {
            let index = (self.position / segment_size as u64) as usize;
            let offset = (self.position % segment_size as u64) as usize;
            let chunk = cmp::min((segment_size - offset) as u64, self.length - self.position);
            let chunk = chunk as usize;
            writer.write_all(&self.table.segment(index)[offset..offset + chunk])?;
            self.position += chunk as u64;
            total += chunk as u64;
        }
        Ok(total)
    }

    /// 关闭流：逆序归还全部段，长度与游标归零。
    ///
    /// 幂等：第二次调用不会再归还任何段，`Drop` 兜底路径同样经过这里。
    pub fn close(&mut self) {
        if self.lifecycle == Lifecycle::Closed {
            return;
        }
        self.lifecycle = Lifecycle::Closed;
        let released = self.table.release_all();
        self.length = 0;
        self.position = 0;
        tracing::debug!(released, "池化内存流已关闭，段已归还");
    }

    fn ensure_open(&self) -> Result<(), StreamError> {
        match self.lifecycle {
            Lifecycle::Open => Ok(()),
            Lifecycle::Closed => Err(StreamError::Closed),
        }
    }

    /// 把 `[from, to)` 清零，按段批量填充。
    fn zero_fill(&mut self, from: u64, to: u64) -> Result<(), StreamError> {
        let segment_size = self.table.segment_size();
        let mut cursor = from;
        while cursor < to {
            let index = self.table.ensure_covers(cursor)?;
            let offset = (cursor % segment_size as u64) as usize;
            let chunk = cmp::min((segment_size - offset) as u64, to - cursor) as usize;
            self.table.segment_mut(index)[offset..offset + chunk].fill(0);
            cursor += chunk as u64;
        }
        Ok(())
    }
}

/// `base + delta` 钳制到 `[0, upper]`。
fn clamp_offset(base: u64, delta: i64, upper: u64) -> u64 {
    let target = if delta >= 0 {
        base.saturating_add(delta.unsigned_abs())
    } else {
        base.saturating_sub(delta.unsigned_abs())
    };
    cmp::min(target, upper)
}

impl Drop for PooledMemoryStream {
    fn drop(&mut self) {
        if self.lifecycle == Lifecycle::Open {
            tracing::debug!(
                segments = self.table.segment_count(),
                "池化内存流未显式关闭，作用域结束时自动归还段"
            );
            self.close();
        }
    }
}

impl Read for PooledMemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(PooledMemoryStream::read(self, buf))
    }
}

impl Write for PooledMemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(PooledMemoryStream::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for PooledMemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(PooledMemoryStream::seek(self, pos))
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.position)
    }
}

impl std::fmt::Debug for PooledMemoryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledMemoryStream")
            .field("length", &self.length)
            .field("position", &self.position)
            .field("capacity", &self.table.capacity())
            .field("segment_size", &self.table.segment_size())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}
