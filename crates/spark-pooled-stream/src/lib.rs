#![deny(unsafe_code)]

//! `spark-pooled-stream` 提供基于分段池化的可增长、可随机访问内存字节流。
//!
//! # 模块定位（Why）
//! - 面向“大量短生命周期、长度不定的临时缓冲”负载（例如每请求一块的暂存区），
//!   避免反复进行大块堆分配与拷贝；
//! - 存储被拆成固定大小的段，段从共享池租借、在流关闭时归还，池跨流复用同一批内存。
//!
//! # 设计概要（How）
//! - `segment` 模块定义只能移动、不能复制的 [`Segment`] 句柄，使“同一段被归还两次”在类型层面不可表达；
//! - `pool` 模块定义消费侧契约 [`SegmentPool`]（`rent` / `reclaim`），并给出基于自由链表的默认实现
//!   [`SlabSegmentPool`]；
//! - `table` 模块维护有序段表，负责偏移换算与惰性、急切、只增不减的增长；
//! - `stream` 模块实现 [`PooledMemoryStream`] 的读、写、定位、设置长度与关闭，
//!   并实现 `std::io::{Read, Write, Seek}`；
//! - `config` 模块承载可从 TOML 加载的段大小与池上限配置。
//!
//! # 使用约定（What）
//! - 单个流实例只由一个调用方使用，内部不做同步；池可以被任意多个流并发共享；
//! - 优先显式调用 [`PooledMemoryStream::close`]，作用域结束时的 `Drop` 只是兜底；
//! - 越界定位与读到末尾都被静默钳制，唯一的运行期失败来自池租借与已关闭流上的扩容。
//!
//! ```rust
//! use std::io::SeekFrom;
//! use spark_pooled_stream::{PooledMemoryStream, SlabSegmentPool};
//!
//! let mut stream = PooledMemoryStream::new(SlabSegmentPool::shared());
//! stream.write(b"hello, pooled world").unwrap();
//! stream.seek(SeekFrom::Start(7));
//!
//! let mut word = [0u8; 6];
//! assert_eq!(stream.read(&mut word), 6);
//! assert_eq!(&word, b"pooled");
//! stream.close();
//! ```

mod config;
mod error;
mod pool;
mod segment;
mod stream;
mod table;

pub use config::{DEFAULT_SEGMENT_SIZE, PooledStreamConfig, SlabPoolConfig, StreamConfig};
pub use error::{ConfigError, PoolError, StreamError};
pub use pool::{PoolStats, SegmentPool, SlabSegmentPool};
pub use segment::Segment;
pub use stream::PooledMemoryStream;
