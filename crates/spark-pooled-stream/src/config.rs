//! 池化内存流的配置结构。
//!
//! # 模块定位（Why）
//! - 段大小与池上限属于部署期决策：同一份二进制在网关与批处理任务中往往需要不同的段粒度；
//! - 将这些参数外部化为可反序列化的结构，调用方可以从 TOML 文件或内联字符串加载，
//!   也可以直接在代码中构造。
//!
//! # 配置样例（What）
//! ```toml
//! [stream]
//! segment_size = 65536
//!
//! [pool]
//! max_leased_segments = 1024
//! max_retained_segments = 256
//! ```
//!
//! # 设计要点（How）
//! - 所有结构均带 `#[serde(default)]`，缺省字段回落到 [`Default`]；
//! - 反序列化后统一走 [`PooledStreamConfig::validate`]，确保非法值在启动阶段暴露而非运行期。

use serde::Deserialize;

use crate::error::ConfigError;

/// 默认段大小：64 KiB。
pub const DEFAULT_SEGMENT_SIZE: usize = 65_536;

/// 单个内存流的配置。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// 每个段的字节数，必须大于 0。
    pub segment_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_size == 0 {
            return Err(ConfigError::Invalid {
                field: "stream.segment_size",
                reason: "段大小必须大于 0",
            });
        }
        Ok(())
    }
}

/// [`SlabSegmentPool`](crate::SlabSegmentPool) 的容量约束。
///
/// # 教案式说明
/// - **意图（Why）**：默认池不设上限，与进程内共享数组池的行为一致；在多租户场景下，
///   运维需要一个硬上限防止单个请求把内存吃光，同时限制自由链表的驻留量以便回落峰值。
/// - **契约（What）**：
///   - `max_leased_segments`：同时处于租借状态的段数上限，超出后 `rent` 返回
///     [`PoolError::Exhausted`](crate::PoolError::Exhausted)；`None` 表示不限；
///   - `max_retained_segments`：自由链表最多保留的空闲段数，超出部分在归还时直接释放；`None` 表示不限。
/// - **风险提示（Trade-offs）**：租借上限会把“内存不足”提前转化为写入错误，调用方需要准备好处理
///   [`StreamError::Pool`](crate::StreamError::Pool)。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SlabPoolConfig {
    pub max_leased_segments: Option<usize>,
    pub max_retained_segments: Option<usize>,
}

impl SlabPoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_leased_segments == Some(0) {
            return Err(ConfigError::Invalid {
                field: "pool.max_leased_segments",
                reason: "租借上限为 0 将导致任何写入都失败",
            });
        }
        Ok(())
    }
}

/// 顶层配置，聚合 `[stream]` 与 `[pool]` 两个表。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PooledStreamConfig {
    pub stream: StreamConfig,
    pub pool: SlabPoolConfig,
}

impl PooledStreamConfig {
    /// 从 TOML 文本解析并校验配置。
    ///
    /// # 契约说明（What）
    /// - **输入**：完整的 TOML 文档，允许为空字符串（全部取默认值）；
    /// - **返回值**：成功时返回已通过 [`validate`](Self::validate) 的配置；
    ///   语法错误返回 [`ConfigError::Parse`]，取值错误返回 [`ConfigError::Invalid`]。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stream.validate()?;
        self.pool.validate()
    }
}
