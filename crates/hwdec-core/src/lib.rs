//! # hwdec-core
//!
//! 硬件解码前端的核心库, 提供统一错误类型与比特流读写工具.
//!
//! 上层的 H.264 语法解析与 DPB 管理 (`hwdec-codec`) 均建立在本 crate 之上.

pub mod bitreader;
pub mod bitwriter;
pub mod error;

// 重导出常用类型
pub use bitreader::BitReader;
pub use bitwriter::BitWriter;
pub use error::{HwdecError, HwdecResult, ParamSetKind};
