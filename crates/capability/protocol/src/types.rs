//! 协议相关类型定义与寄存器编解码

use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::{TagCategory, TagDataType};

/// 一次区间读取的原始结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValues {
    /// 线圈 / 离散输入
    Bits(Vec<bool>),
    /// 输入寄存器 / 保持寄存器
    Words(Vec<u16>),
}

impl RawValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Bits(bits) => bits.len(),
            Self::Words(words) => words.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 单点写入的原始值。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawWrite {
    Bit(bool),
    Words(Vec<u16>),
}

/// PLC 传输抽象（一个端点一个实例）。
#[async_trait]
pub trait PlcTransport: Send + Sync {
    async fn connect(&self) -> Result<(), ProtocolError>;

    async fn disconnect(&self) -> Result<(), ProtocolError>;

    async fn read_range(
        &self,
        category: TagCategory,
        start: u16,
        length: u16,
    ) -> Result<RawValues, ProtocolError>;

    async fn write_point(
        &self,
        category: TagCategory,
        address: u16,
        value: RawWrite,
    ) -> Result<(), ProtocolError>;
}

/// 解析寄存器数据为浮点值（大端字序）
pub fn decode_words(registers: &[u16], data_type: TagDataType) -> Result<f64, ProtocolError> {
    let needed = data_type.word_count() as usize;
    if registers.len() < needed {
        return Err(ProtocolError::DataParse(format!(
            "need {} registers for {:?}, got {}",
            needed,
            data_type,
            registers.len()
        )));
    }

    let value = match data_type {
        TagDataType::Int16 => registers[0] as i16 as f64,
        TagDataType::Uint16 => registers[0] as f64,
        TagDataType::Int32 => join_words(registers[0], registers[1]) as i32 as f64,
        TagDataType::Uint32 => join_words(registers[0], registers[1]) as f64,
        TagDataType::Float32 => f32::from_bits(join_words(registers[0], registers[1])) as f64,
    };
    Ok(value)
}

/// 将原始值编码为寄存器（整数类型四舍五入并做范围检查）
pub fn encode_words(raw: f64, data_type: TagDataType) -> Result<Vec<u16>, ProtocolError> {
    if !raw.is_finite() {
        return Err(ProtocolError::DataParse("value is not finite".to_string()));
    }
    let rounded = raw.round();
    let out_of_range = |min: f64, max: f64| {
        ProtocolError::DataParse(format!(
            "value {} out of range for {:?} [{}, {}]",
            raw, data_type, min, max
        ))
    };
    let words = match data_type {
        TagDataType::Int16 => {
            if rounded < i16::MIN as f64 || rounded > i16::MAX as f64 {
                return Err(out_of_range(i16::MIN as f64, i16::MAX as f64));
            }
            vec![rounded as i16 as u16]
        }
        TagDataType::Uint16 => {
            if rounded < 0.0 || rounded > u16::MAX as f64 {
                return Err(out_of_range(0.0, u16::MAX as f64));
            }
            vec![rounded as u16]
        }
        TagDataType::Int32 => {
            if rounded < i32::MIN as f64 || rounded > i32::MAX as f64 {
                return Err(out_of_range(i32::MIN as f64, i32::MAX as f64));
            }
            split_words(rounded as i32 as u32).to_vec()
        }
        TagDataType::Uint32 => {
            if rounded < 0.0 || rounded > u32::MAX as f64 {
                return Err(out_of_range(0.0, u32::MAX as f64));
            }
            split_words(rounded as u32).to_vec()
        }
        TagDataType::Float32 => split_words((raw as f32).to_bits()).to_vec(),
    };
    Ok(words)
}

fn join_words(high: u16, low: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}

fn split_words(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, value as u16]
}
