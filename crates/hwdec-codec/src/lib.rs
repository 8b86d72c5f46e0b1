//! # hwdec-codec
//!
//! H.264 基本流解析与硬件解码前端.
//!
//! - [`parsers::h264`]: NAL 分割, SPS / PPS / 切片头语法解析
//! - [`hwaccel::h264`]: 访问单元边界检测, POC, 参考图像标记, DPB,
//!   硬件参考列表与解码参数块, 以及驱动这一切的 [`H264HwDecoder`]
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use hwdec_codec::{DecoderConfig, H264HwDecoder};
//!
//! let mut decoder = H264HwDecoder::new(backend, DecoderConfig::default());
//! decoder.decode_packet(&annex_b_bytes)?;
//! decoder.flush()?;
//! ```

pub mod hwaccel;
pub mod parsers;

// 重导出常用类型
pub use hwaccel::h264::{
    DecodedPicture, DecoderConfig, DecoderStats, Dpb, FrameHandle, H264HwDecoder, HwDecodeBackend,
    PictureId, PictureInfoH264, VdpReferenceFrameH264,
};
pub use parsers::h264::{NalUnit, NalUnitType, Pps, SliceHeader, Sps};
