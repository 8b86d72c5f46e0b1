//! H.264 硬件解码前端.
//!
//! 数据流:
//! ```text
//! NAL ─► NalParser (参数集表, 访问单元边界) ─► H264HwDecoder
//!          H264HwDecoder ─► POC / 图像编号
//!          H264HwDecoder ─► PictureInfoH264 + 参考列表 ─► HwDecodeBackend::decode
//!          H264HwDecoder ─► 参考图像标记 ─► Dpb
//!          Dpb ─► POC 顺序输出 ─► HwDecodeBackend::present
//! ```

mod config;
mod context;
mod decoder;
mod dpb;
mod marking;
mod picture;
mod picture_info;
mod poc;
mod reflist;

pub use config::DecoderConfig;
pub use context::{NalContext, NalOutcome, NalParser, ParsedNal};
pub use decoder::{DecoderStats, H264HwDecoder, HwDecodeBackend};
pub use dpb::{Dpb, MAX_DPB_SIZE, PictureId};
pub use marking::{MarkingOutcome, RefPicMarker, update_pic_nums};
pub use picture::{
    CodedPicture, DecodedPicture, FrameHandle, PictureFlags, PictureStructure,
    VDP_INVALID_HANDLE, VdpVideoSurface,
};
pub use picture_info::{PictureInfoH264, build_picture_info};
pub use poc::{PocState, mmco5_adjusted};
pub use reflist::{MAX_REFERENCE_FRAMES, VdpReferenceFrameH264, fill_vdpau_reference_list};
