//! 硬件解码前端.
//!
//! 负责把解析后的语法元素整理为硬件解码调用所需的参数块,
//! 并管理解码图像缓冲区 (DPB) 中帧的生命周期与输出顺序.

pub mod h264;
