//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为池化内存流对外暴露的失败语义提供集中定义：池租借失败、流已关闭、偏移越界与上游读取失败；
//! - 越界游标、读到流末尾等情况按“静默钳制”处理，**不**在此建模，避免调用方为正常路径编写错误分支。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，兼容 `std::error::Error` 与 `?` 传播；
//! - [`StreamError`] 可无损转换为 [`std::io::Error`]，保证 `io::Write` 实现能够直接透传；
//! - 池耗尽被视为致命的分配失败，流内部不做重试。

use std::io;

use thiserror::Error;

/// 段池在租借阶段可能返回的错误。
///
/// # 教案式说明
/// - **意图 (Why)**：池是外部协作者，只承诺 `rent`/`reclaim` 契约；当池设定了租借上限时，
///   需要一个稳定的失败形态告知流“本次扩容无法完成”。
/// - **契约 (What)**：
///   - `Exhausted`：活跃租约已达到 `limit`，调用方不应原地重试；
///   - `InvalidSegmentSize`：请求的段大小为 0，属于调用方编程错误。
/// - **风险 (Trade-offs)**：`Exhausted` 不携带等待/背压语义，纯内存场景下不存在瞬时故障模型。
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PoolError {
    /// 活跃租约已达到池配置的上限。
    #[error("段池已耗尽：活跃租约达到上限 {limit}")]
    Exhausted { limit: usize },
    /// 请求的段大小为 0。
    #[error("段大小必须大于 0")]
    InvalidSegmentSize,
}

/// 池化内存流的统一错误类型。
///
/// # 教案式说明
/// - **意图 (Why)**：读写引擎本身几乎不会失败，唯一的失败来源是“扩容”与“构造”；
///   将这些路径收敛为一个枚举，方便调用方一次性处理。
/// - **契约 (What)**：
///   - `Pool`：扩容时租借段失败，已完成的分块写入保持有效，`position`/`len` 反映已写入部分；
///   - `Closed`：流已关闭，拒绝任何会触发扩容的操作；
///   - `InvalidSegmentSize`：构造时段大小为 0；
///   - `OffsetOverflow`：偏移换算出的段下标超出 `usize` 可表示范围；
///   - `ShortSegment`：池交出的段短于请求的段大小，违反 `rent` 契约，该段已被退回；
///   - `Source`：从上游 `io::Read` 抽取数据时发生的 I/O 错误。
#[derive(Debug, Error)]
pub enum StreamError {
    /// 扩容租借失败。
    #[error("扩容租借段失败: {0}")]
    Pool(#[from] PoolError),
    /// 流已关闭，不允许再次扩容。
    #[error("池化内存流已关闭，拒绝继续写入或设置长度")]
    Closed,
    /// 段大小为 0。
    #[error("段大小必须大于 0")]
    InvalidSegmentSize,
    /// 偏移对应的段下标超出平台可寻址范围。
    #[error("偏移 {offset} 超出可寻址的段表范围")]
    OffsetOverflow { offset: u64 },
    /// 池交出的段短于请求大小。
    #[error("段池交出的段长度 {actual} 小于请求的段大小 {expected}")]
    ShortSegment { expected: usize, actual: usize },
    /// 读取上游数据源失败。
    #[error("读取上游数据源失败: {0}")]
    Source(#[source] io::Error),
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match &err {
            StreamError::Pool(_) => io::ErrorKind::OutOfMemory,
            StreamError::Closed => io::ErrorKind::BrokenPipe,
            StreamError::InvalidSegmentSize | StreamError::OffsetOverflow { .. } => {
                io::ErrorKind::InvalidInput
            }
            StreamError::ShortSegment { .. } => io::ErrorKind::InvalidData,
            StreamError::Source(source) => source.kind(),
        };
        io::Error::new(kind, err)
    }
}

/// 配置加载与校验失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML 文本无法解析为配置结构。
    #[error("解析池化内存流配置失败: {0}")]
    Parse(#[from] toml::de::Error),
    /// 字段取值不合法。
    #[error("配置项 `{field}` 非法: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}
