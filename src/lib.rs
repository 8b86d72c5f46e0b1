//! # hwdec
//!
//! H.264 基本流解析与硬件解码前端.
//!
//! 把 Annex B / avcC 码流拆分为 NAL 单元, 解析参数集与切片头, 检测访问单元边界,
//! 计算 POC, 执行参考图像标记并维护 DPB, 最终为 VDPAU 风格的硬件解码接口
//! 组装图像参数块与 16 项参考列表, 再按显示顺序交付解码完成的帧.
//!
//! # 快速开始
//!
//! ```rust,ignore
//! use hwdec::codec::{DecoderConfig, H264HwDecoder};
//!
//! let mut decoder = H264HwDecoder::new(backend, DecoderConfig::default());
//! decoder.decode_packet(&annex_b_bytes)?;
//! decoder.flush()?;
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `hwdec-core` | 错误类型, 比特流读写 (Exp-Golomb) |
//! | `hwdec-codec` | NAL / SPS / PPS / 切片头解析, DPB 与硬件解码驱动 |

/// 错误类型与比特流读写
pub use hwdec_core as core;

/// H.264 语法解析与硬件解码前端
pub use hwdec_codec as codec;

/// 获取 hwdec 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
