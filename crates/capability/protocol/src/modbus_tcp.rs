//! Modbus TCP 传输实现
//!
//! 类别与功能码映射：
//!
//! | 类别 | 读 | 写 |
//! |------|----|----|
//! | DI   | FC2 离散输入 | 只读 |
//! | DO   | FC1 线圈 | FC5 |
//! | AI   | FC4 输入寄存器 | 只读 |
//! | AO / REG | FC3 保持寄存器 | FC6 / FC16 |

use crate::error::ProtocolError;
use crate::types::{PlcTransport, RawValues, RawWrite};
use async_trait::async_trait;
use domain::{PlcEndpoint, TagCategory};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_modbus::prelude::*;
use tracing::{debug, info};

/// Modbus TCP 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusTcpConfig {
    /// Modbus 服务器主机地址
    pub host: String,
    /// Modbus 服务器端口（默认 502）
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    /// 从站 ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

impl From<&PlcEndpoint> for ModbusTcpConfig {
    fn from(endpoint: &PlcEndpoint) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            unit_id: endpoint.unit_id,
        }
    }
}

/// Modbus TCP 传输（单连接，操作串行）。
pub struct ModbusTcpTransport {
    config: ModbusTcpConfig,
    ctx: Mutex<Option<tokio_modbus::client::Context>>,
}

impl ModbusTcpTransport {
    pub fn new(config: ModbusTcpConfig) -> Self {
        Self {
            config,
            ctx: Mutex::new(None),
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

#[async_trait]
impl PlcTransport for ModbusTcpTransport {
    async fn connect(&self) -> Result<(), ProtocolError> {
        let address = self.address();
        let addr = tokio::net::lookup_host(&address)
            .await
            .map_err(|e| ProtocolError::Connection(format!("resolve {}: {}", address, e)))?
            .next()
            .ok_or_else(|| ProtocolError::Connection(format!("resolve {}: no address", address)))?;

        let mut ctx = tcp::connect(addr)
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        ctx.set_slave(Slave(self.config.unit_id));

        info!(target: "plcmon.protocol", addr = %addr, unit_id = self.config.unit_id, "modbus_connected");
        *self.ctx.lock().await = Some(ctx);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        // 丢弃上下文即关闭底层 TCP 连接
        self.ctx.lock().await.take();
        Ok(())
    }

    async fn read_range(
        &self,
        category: TagCategory,
        start: u16,
        length: u16,
    ) -> Result<RawValues, ProtocolError> {
        let mut guard = self.ctx.lock().await;
        let ctx = guard.as_mut().ok_or(ProtocolError::NotConnected)?;

        let result = match category {
            TagCategory::DigitalInput => ctx
                .read_discrete_inputs(start, length)
                .await
                .map(|inner| inner.map(RawValues::Bits)),
            TagCategory::DigitalOutput => ctx
                .read_coils(start, length)
                .await
                .map(|inner| inner.map(RawValues::Bits)),
            TagCategory::AnalogInput => ctx
                .read_input_registers(start, length)
                .await
                .map(|inner| inner.map(RawValues::Words)),
            TagCategory::AnalogOutput | TagCategory::Register => ctx
                .read_holding_registers(start, length)
                .await
                .map(|inner| inner.map(RawValues::Words)),
        };

        let values = match result {
            Ok(Ok(values)) => values,
            Ok(Err(exception)) => {
                return Err(ProtocolError::Modbus(format!("exception: {:?}", exception)));
            }
            Err(err) => {
                // 链路错误后连接不可复用
                guard.take();
                return Err(ProtocolError::Modbus(err.to_string()));
            }
        };

        let values = match values {
            RawValues::Bits(mut bits) => {
                bits.truncate(length as usize);
                RawValues::Bits(bits)
            }
            words => words,
        };
        if values.len() < length as usize {
            return Err(ProtocolError::DataParse(format!(
                "short read: expected {}, got {}",
                length,
                values.len()
            )));
        }

        debug!(
            target: "plcmon.protocol",
            category = %category,
            start,
            length,
            "modbus_read"
        );
        Ok(values)
    }

    async fn write_point(
        &self,
        category: TagCategory,
        address: u16,
        value: RawWrite,
    ) -> Result<(), ProtocolError> {
        if category.is_read_only() {
            return Err(ProtocolError::Unsupported(format!(
                "{} is read-only",
                category
            )));
        }
        let mut guard = self.ctx.lock().await;
        let ctx = guard.as_mut().ok_or(ProtocolError::NotConnected)?;

        let result = match (category, value) {
            (TagCategory::DigitalOutput, RawWrite::Bit(bit)) => {
                ctx.write_single_coil(address, bit).await
            }
            (TagCategory::AnalogOutput | TagCategory::Register, RawWrite::Words(words)) => {
                if words.len() == 1 {
                    ctx.write_single_register(address, words[0]).await
                } else {
                    ctx.write_multiple_registers(address, &words).await
                }
            }
            (category, value) => {
                return Err(ProtocolError::Unsupported(format!(
                    "cannot write {:?} to {}",
                    value, category
                )));
            }
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(exception)) => Err(ProtocolError::Modbus(format!("exception: {:?}", exception))),
            Err(err) => {
                guard.take();
                Err(ProtocolError::Modbus(err.to_string()))
            }
        }
    }
}
