//! PLC 监控领域模型：点位、分组、采集值、报警、连接状态、配置快照。

pub mod alarm;
pub mod connection;
pub mod snapshot;
pub mod tag;
pub mod value;

pub use alarm::{AlarmCondition, AlarmEvent, AlarmRule, AlarmTrigger};
pub use connection::{ConnectionEvent, ConnectionState, ConnectionStatus};
pub use snapshot::{ConfigSnapshot, ConfigurationError};
pub use tag::{
    MAX_BIT_SPAN, MAX_REGISTER_SPAN, PlcEndpoint, TagCategory, TagConfig, TagDataType, TagGroup,
};
pub use value::{QUALITY_GOOD, RecordIdentity, TagValue, ValueRecord};

/// 获取当前时间戳（毫秒）
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
