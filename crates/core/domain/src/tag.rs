//! 点位（Tag）与 PLC 端点模型。

use serde::{Deserialize, Serialize};

/// 单次请求可读取的最大寄存器数量（Modbus FC3/FC4）。
pub const MAX_REGISTER_SPAN: u16 = 125;
/// 单次请求可读取的最大位数量（Modbus FC1/FC2）。
pub const MAX_BIT_SPAN: u16 = 2000;

/// 点位类别（决定地址空间与读写功能码）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TagCategory {
    #[serde(rename = "DI", alias = "digitalInput")]
    DigitalInput,
    #[serde(rename = "DO", alias = "digitalOutput")]
    DigitalOutput,
    #[serde(rename = "AI", alias = "analogInput")]
    AnalogInput,
    #[serde(rename = "AO", alias = "analogOutput")]
    AnalogOutput,
    #[serde(rename = "REG", alias = "register")]
    Register,
}

impl TagCategory {
    /// 位地址空间（线圈 / 离散输入）。
    pub fn is_digital(self) -> bool {
        matches!(self, Self::DigitalInput | Self::DigitalOutput)
    }

    /// 只读类别不接受写入命令。
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::DigitalInput | Self::AnalogInput)
    }

    /// 单个分组允许覆盖的最大地址跨度。
    pub fn max_span(self) -> u16 {
        if self.is_digital() {
            MAX_BIT_SPAN
        } else {
            MAX_REGISTER_SPAN
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DigitalInput => "DI",
            Self::DigitalOutput => "DO",
            Self::AnalogInput => "AI",
            Self::AnalogOutput => "AO",
            Self::Register => "REG",
        }
    }
}

impl std::fmt::Display for TagCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 寄存器数据类型（大端字序）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagDataType {
    /// 16位有符号整数
    Int16,
    /// 16位无符号整数
    #[default]
    Uint16,
    /// 32位有符号整数（2个寄存器）
    Int32,
    /// 32位无符号整数（2个寄存器）
    Uint32,
    /// 32位浮点数（2个寄存器）
    Float32,
}

impl TagDataType {
    /// 所需寄存器数量。
    pub fn word_count(self) -> u16 {
        match self {
            Self::Int16 | Self::Uint16 => 1,
            Self::Int32 | Self::Uint32 | Self::Float32 => 2,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, Self::Float32)
    }
}

/// 点位静态配置。
///
/// 加载后在一个轮询周期内不可变；配置变更时整体替换。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// 所属 PLC 端点 ID（只有一个端点时可省略）。
    #[serde(default)]
    pub plc_id: Option<String>,
    #[serde(alias = "type")]
    pub category: TagCategory,
    pub address: u16,
    #[serde(default = "default_length")]
    pub length: u16,
    #[serde(alias = "refreshRate")]
    pub refresh_rate_ms: u64,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub data_type: TagDataType,
}

fn default_length() -> u16 {
    1
}

fn default_scale() -> f64 {
    1.0
}

impl TagConfig {
    /// 地址区间终点（不含）。
    pub fn end_address(&self) -> u32 {
        self.address as u32 + self.length as u32
    }
}

/// PLC 端点配置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlcEndpoint {
    pub id: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default)]
    pub simulation: bool,
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

impl PlcEndpoint {
    /// 端点键：`host:port`。
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 采集分组：同端点、同类别、同刷新周期的连续地址区间。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagGroup {
    pub endpoint_key: String,
    pub category: TagCategory,
    pub start_address: u16,
    pub length: u16,
    pub refresh_rate_ms: u64,
    pub member_tag_ids: Vec<String>,
}

impl TagGroup {
    /// 分组的稳定标识（用于调度任务与过期结果判定）。
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}ms/{}+{}",
            self.endpoint_key, self.category, self.refresh_rate_ms, self.start_address, self.length
        )
    }

    pub fn end_address(&self) -> u32 {
        self.start_address as u32 + self.length as u32
    }
}
