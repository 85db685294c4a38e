//! 核心：错误类型、优雅关闭、文本工具

pub mod error;
pub mod shutdown;
pub mod text;

pub use error::{AgentError, StoreError};
pub use shutdown::ShutdownManager;
pub use text::{preview, truncate_chars};
