//! 统一错误类型定义.
//!
//! 解析与 DPB 错误在调用路径上局部处理 (记录日志后丢弃图像),
//! 只有内存分配失败与后端错误会向外传播.

use std::fmt;

use thiserror::Error;

/// 参数集种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSetKind {
    Sps,
    Pps,
}

impl fmt::Display for ParamSetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sps => write!(f, "SPS"),
            Self::Pps => write!(f, "PPS"),
        }
    }
}

/// 硬件解码前端统一错误类型
#[derive(Debug, Error)]
pub enum HwdecError {
    /// 语法元素越界或码流被截断
    #[error("语法错误: {0}")]
    MalformedSyntax(String),

    /// 切片引用了尚未收到的参数集
    #[error("缺少参数集: {kind} id={id}")]
    MissingParameterSet { kind: ParamSetKind, id: u32 },

    /// 参考图像标记命令的目标不在 DPB 中
    #[error("参考图像不一致: {0}")]
    ReferenceInconsistency(String),

    /// 可用参考帧超过硬件参考列表容量
    #[error("参考列表溢出: {available} 个参考帧, 容量 {capacity}")]
    ReferenceListOverflow { available: usize, capacity: usize },

    /// 内存分配失败
    #[error("内存分配失败: {0}")]
    OutOfMemory(String),

    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 硬件解码后端错误
    #[error("解码后端错误: {0}")]
    Backend(String),
}

impl From<std::collections::TryReserveError> for HwdecError {
    fn from(err: std::collections::TryReserveError) -> Self {
        Self::OutOfMemory(err.to_string())
    }
}

/// 统一 Result 类型
pub type HwdecResult<T> = Result<T, HwdecError>;
