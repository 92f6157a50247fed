//! Handlers 模块

pub mod alarms;
pub mod history;
pub mod system;
pub mod values;

pub use alarms::*;
pub use history::*;
pub use system::*;
pub use values::*;
