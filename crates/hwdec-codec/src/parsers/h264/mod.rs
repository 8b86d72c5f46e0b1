//! H.264/AVC 码流解析器.
//!
//! 提供对 H.264 Annex B 和 AVCC 格式码流的语法解析:
//! - NAL 单元分割, 类型识别与防竞争字节处理
//! - SPS / PPS 解析 (含 VUI, 量化矩阵, 切片组)
//! - 切片头解析

pub mod nal;
pub mod pps;
pub mod scaling;
pub mod slice;
pub mod sps;

#[cfg(test)]
pub(crate) mod test_streams;

pub use nal::{
    AvccConfig, NalUnit, NalUnitType, decode_nal, encode_nal, parse_avcc_config, split_annex_b,
    split_avcc,
};
pub use pps::{Pps, SliceGroupMap, parse_pps};
pub use scaling::ScalingMatrix;
pub use slice::{
    DecRefPicMarking, MemoryManagementOp, SliceHeader, SliceType, parse_slice_header,
    slice_pps_id,
};
pub use sps::{Sps, Vui, parse_sps};
