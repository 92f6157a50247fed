//! # 协议通信能力模块
//!
//! 提供 PLC 端点的读写与连接管理：
//! - **Modbus TCP**：线圈、离散输入、输入寄存器、保持寄存器
//! - **仿真传输**：随机游走 / 固定种子 / 静态值，无需真实设备
//! - **连接管理**：每端点一个状态机，线性退避重连，超过次数后需手动 reset
//!
//! ## 架构设计
//!
//! ```text
//! Polling Scheduler / 写入命令
//!       │
//!       ▼
//! ConnectionManager ──状态事件──▶ Bus<ConnectionEvent>
//!       │
//!       ├── ModbusTcpTransport
//!       └── SimulatedTransport
//! ```
//!
//! 所有 IO 都包在超时里，超时视为传输错误。

mod error;
mod manager;
mod modbus_tcp;
mod simulation;
mod types;

pub use error::{ProtocolError, TransportError};
pub use manager::{
    ConnectionManager, ConnectionManagerConfig, ModbusTcpFactory, TransportFactory, backoff_delay,
};
pub use modbus_tcp::{ModbusTcpConfig, ModbusTcpTransport};
pub use simulation::{SimTagProfile, SimulatedTransport, SimulationMode};
pub use types::*;
