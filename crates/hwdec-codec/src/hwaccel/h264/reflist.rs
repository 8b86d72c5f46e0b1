//! 硬件解码调用使用的 16 项参考帧列表.

use hwdec_core::HwdecError;
use log::warn;

use super::dpb::Dpb;
use super::picture::{FrameHandle, PictureStructure, VDP_INVALID_HANDLE, VdpVideoSurface};

/// 参考帧列表容量
pub const MAX_REFERENCE_FRAMES: usize = 16;

/// 参考帧列表项 (VdpReferenceFrameH264)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VdpReferenceFrameH264 {
    pub surface: VdpVideoSurface,
    pub is_long_term: bool,
    pub top_is_reference: bool,
    pub bottom_is_reference: bool,
    pub field_order_cnt: [i32; 2],
    /// 短期参考为 frame_num, 长期参考为 LongTermFrameIdx
    pub frame_idx: u32,
}

impl VdpReferenceFrameH264 {
    /// 未使用的列表项
    pub const INVALID: Self = Self {
        surface: VDP_INVALID_HANDLE,
        is_long_term: false,
        top_is_reference: false,
        bottom_is_reference: false,
        field_order_cnt: [0, 0],
        frame_idx: 0,
    };

    pub fn is_valid(&self) -> bool {
        self.surface != VDP_INVALID_HANDLE
    }
}

impl Default for VdpReferenceFrameH264 {
    fn default() -> Self {
        Self::INVALID
    }
}

/// 由 DPB 中的参考图像填充参考帧列表
///
/// 短期参考按 FrameNumWrap 降序在前, 长期参考按 LongTermFrameIdx 升序在后,
/// 未使用的项为无效表面. 超出 16 项的参考被丢弃并记录警告.
pub fn fill_vdpau_reference_list<F: FrameHandle>(
    dpb: &Dpb<F>,
) -> [VdpReferenceFrameH264; MAX_REFERENCE_FRAMES] {
    let mut refs: Vec<_> = dpb.iter().filter(|(_, pic)| pic.is_reference()).collect();
    refs.sort_by_key(|(_, pic)| {
        if pic.long_term {
            (1, i64::from(pic.long_term_frame_idx))
        } else {
            (0, -i64::from(pic.frame_num_wrap))
        }
    });

    if refs.len() > MAX_REFERENCE_FRAMES {
        let err = HwdecError::ReferenceListOverflow {
            available: refs.len(),
            capacity: MAX_REFERENCE_FRAMES,
        };
        warn!("H264: {err}, 多余的参考帧被丢弃");
    }

    let mut list = [VdpReferenceFrameH264::INVALID; MAX_REFERENCE_FRAMES];
    for (entry, (_, pic)) in list.iter_mut().zip(refs) {
        // 缺少互补场时, 缺失一侧的 POC 填 0
        let mut field_order_cnt = pic.field_order_cnt();
        if let Some(parity) = pic.single_field().and_then(PictureStructure::parity) {
            field_order_cnt[1 - parity] = 0;
        }
        *entry = VdpReferenceFrameH264 {
            surface: pic.frame.surface(),
            is_long_term: pic.long_term,
            top_is_reference: pic.top_is_reference,
            bottom_is_reference: pic.bottom_is_reference,
            field_order_cnt,
            frame_idx: if pic.long_term {
                pic.long_term_frame_idx
            } else {
                pic.frame_num()
            },
        };
    }
    list
}
