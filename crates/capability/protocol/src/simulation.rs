//! 仿真传输：用数值生成器替代真实 PLC。
//!
//! - 数字量：每次读取以 10% 概率翻转
//! - 模拟量：在 [min, max] 内按量程 ±2% 随机游走
//! - 写入值被记住，后续读取反映写入结果

use crate::error::ProtocolError;
use crate::types::{PlcTransport, RawValues, RawWrite, decode_words, encode_words};
use async_trait::async_trait;
use domain::{TagCategory, TagConfig, TagDataType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Mutex;

const FLIP_PROBABILITY: f64 = 0.1;
const WALK_RATIO: f64 = 0.02;
const DEFAULT_MIN: f64 = 0.0;
const DEFAULT_MAX: f64 = 100.0;

/// 仿真数值生成方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimulationMode {
    /// 随机游走（系统熵源）
    #[default]
    Random,
    /// 随机游走（固定种子，可复现）
    Seeded(u64),
    /// 数值保持不变（仅写入改变）
    Static,
}

/// 仿真点位描述（原始值量程）。
#[derive(Debug, Clone, PartialEq)]
pub struct SimTagProfile {
    pub category: TagCategory,
    pub address: u16,
    pub data_type: TagDataType,
    pub raw_min: f64,
    pub raw_max: f64,
}

impl SimTagProfile {
    /// 由点位配置推导原始量程（工程量 / scale）。
    pub fn from_tag(tag: &TagConfig) -> Self {
        let min = tag.min.unwrap_or(DEFAULT_MIN) / tag.scale;
        let max = tag.max.unwrap_or(DEFAULT_MAX) / tag.scale;
        let (raw_min, raw_max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            category: tag.category,
            address: tag.address,
            data_type: tag.data_type,
            raw_min,
            raw_max,
        }
    }
}

struct SimState {
    rng: StdRng,
    bits: HashMap<(TagCategory, u16), bool>,
    words: HashMap<(TagCategory, u16), u16>,
    /// 游走的连续值（避免整数类型取整后停滞）
    levels: HashMap<(TagCategory, u16), f64>,
    profiles: HashMap<(TagCategory, u16), SimTagProfile>,
}

/// 仿真传输。
pub struct SimulatedTransport {
    mode: SimulationMode,
    state: Mutex<SimState>,
}

impl SimulatedTransport {
    pub fn new(mode: SimulationMode) -> Self {
        let rng = match mode {
            SimulationMode::Seeded(seed) => StdRng::seed_from_u64(seed),
            SimulationMode::Random | SimulationMode::Static => StdRng::from_os_rng(),
        };
        Self {
            mode,
            state: Mutex::new(SimState {
                rng,
                bits: HashMap::new(),
                words: HashMap::new(),
                levels: HashMap::new(),
                profiles: HashMap::new(),
            }),
        }
    }

    /// 替换点位量程描述（配置重载时调用）。
    pub fn set_profiles(&self, profiles: Vec<SimTagProfile>) -> Result<(), ProtocolError> {
        let mut state = self.lock()?;
        state.profiles = profiles
            .into_iter()
            .map(|profile| ((profile.category, profile.address), profile))
            .collect();
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SimState>, ProtocolError> {
        self.state
            .lock()
            .map_err(|_| ProtocolError::Connection("simulation state lock failed".to_string()))
    }
}

impl SimState {
    fn read_bits(&mut self, category: TagCategory, start: u16, length: u16, animate: bool) -> Vec<bool> {
        (0..length)
            .map(|offset| {
                let key = (category, start.wrapping_add(offset));
                let current = self.bits.get(&key).copied().unwrap_or(false);
                let next = if animate && self.rng.random_bool(FLIP_PROBABILITY) {
                    !current
                } else {
                    current
                };
                self.bits.insert(key, next);
                next
            })
            .collect()
    }

    fn read_words(&mut self, category: TagCategory, start: u16, length: u16, animate: bool) -> Vec<u16> {
        let end = start as u32 + length as u32;
        let profiles: Vec<SimTagProfile> = self
            .profiles
            .values()
            .filter(|p| p.category == category && p.address >= start && (p.address as u32) < end)
            .cloned()
            .collect();
        for profile in profiles {
            self.step_profile(&profile, animate);
        }
        (0..length)
            .map(|offset| {
                let key = (category, start.wrapping_add(offset));
                *self.words.entry(key).or_insert(0)
            })
            .collect()
    }

    fn step_profile(&mut self, profile: &SimTagProfile, animate: bool) {
        let addresses: Vec<u16> = (0..profile.data_type.word_count())
            .map(|offset| profile.address.wrapping_add(offset))
            .collect();
        let stored: Option<Vec<u16>> = addresses
            .iter()
            .map(|addr| self.words.get(&(profile.category, *addr)).copied())
            .collect();
        let key = (profile.category, profile.address);
        let current = self.levels.get(&key).copied().unwrap_or_else(|| {
            stored
                .and_then(|words| decode_words(&words, profile.data_type).ok())
                .unwrap_or((profile.raw_min + profile.raw_max) / 2.0)
        });
        let next = if animate {
            let span = (profile.raw_max - profile.raw_min).abs().max(1.0);
            let delta = self.rng.random_range(-1.0..=1.0) * span * WALK_RATIO;
            (current + delta).clamp(profile.raw_min, profile.raw_max)
        } else {
            current
        };
        self.levels.insert(key, next);
        if let Ok(words) = encode_words(next, profile.data_type) {
            for (addr, word) in addresses.into_iter().zip(words) {
                self.words.insert((profile.category, addr), word);
            }
        }
    }
}

#[async_trait]
impl PlcTransport for SimulatedTransport {
    async fn connect(&self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn read_range(
        &self,
        category: TagCategory,
        start: u16,
        length: u16,
    ) -> Result<RawValues, ProtocolError> {
        let animate = self.mode != SimulationMode::Static;
        let mut state = self.lock()?;
        if category.is_digital() {
            Ok(RawValues::Bits(state.read_bits(category, start, length, animate)))
        } else {
            Ok(RawValues::Words(state.read_words(category, start, length, animate)))
        }
    }

    async fn write_point(
        &self,
        category: TagCategory,
        address: u16,
        value: RawWrite,
    ) -> Result<(), ProtocolError> {
        if category.is_read_only() {
            return Err(ProtocolError::Unsupported(format!("{} is read-only", category)));
        }
        let mut state = self.lock()?;
        match (category.is_digital(), value) {
            (true, RawWrite::Bit(bit)) => {
                state.bits.insert((category, address), bit);
            }
            (false, RawWrite::Words(words)) => {
                for (offset, word) in words.into_iter().enumerate() {
                    let key = (category, address.wrapping_add(offset as u16));
                    state.words.insert(key, word);
                    state.levels.remove(&key);
                }
            }
            (_, value) => {
                return Err(ProtocolError::Unsupported(format!(
                    "cannot write {:?} to {}",
                    value, category
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(address: u16) -> SimTagProfile {
        SimTagProfile {
            category: TagCategory::Register,
            address,
            data_type: TagDataType::Uint16,
            raw_min: 10.0,
            raw_max: 20.0,
        }
    }

    #[tokio::test]
    async fn random_walk_stays_within_range() {
        let transport = SimulatedTransport::new(SimulationMode::Seeded(7));
        transport.set_profiles(vec![profile(0), profile(1)]).expect("profiles");
        for _ in 0..200 {
            let RawValues::Words(words) = transport
                .read_range(TagCategory::Register, 0, 2)
                .await
                .expect("read")
            else {
                panic!("expected words");
            };
            for word in words {
                assert!((10..=20).contains(&word), "{word} out of range");
            }
        }
    }

    #[tokio::test]
    async fn seeded_mode_is_reproducible() {
        let first = SimulatedTransport::new(SimulationMode::Seeded(42));
        let second = SimulatedTransport::new(SimulationMode::Seeded(42));
        for _ in 0..20 {
            let a = first.read_range(TagCategory::DigitalInput, 0, 8).await.expect("read");
            let b = second.read_range(TagCategory::DigitalInput, 0, 8).await.expect("read");
            assert_eq!(a, b);
        }
    }

    #[tokio::test]
    async fn static_mode_reflects_writes() {
        let transport = SimulatedTransport::new(SimulationMode::Static);
        transport
            .write_point(TagCategory::Register, 5, RawWrite::Words(vec![1, 2]))
            .await
            .expect("write");
        transport
            .write_point(TagCategory::DigitalOutput, 3, RawWrite::Bit(true))
            .await
            .expect("write");

        let words = transport.read_range(TagCategory::Register, 4, 3).await.expect("read");
        assert_eq!(words, RawValues::Words(vec![0, 1, 2]));
        let bits = transport.read_range(TagCategory::DigitalOutput, 3, 1).await.expect("read");
        assert_eq!(bits, RawValues::Bits(vec![true]));
    }

    #[tokio::test]
    async fn rejects_write_to_input() {
        let transport = SimulatedTransport::new(SimulationMode::Static);
        let err = transport
            .write_point(TagCategory::DigitalInput, 0, RawWrite::Bit(true))
            .await
            .expect_err("read only");
        assert!(matches!(err, ProtocolError::Unsupported(_)));
    }
}
