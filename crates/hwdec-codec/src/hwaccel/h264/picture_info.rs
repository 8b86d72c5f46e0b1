//! 硬件解码参数块 (VdpPictureInfoH264).

use crate::parsers::h264::{Pps, SliceHeader, Sps};

use super::picture::{CodedPicture, PictureStructure};
use super::reflist::{MAX_REFERENCE_FRAMES, VdpReferenceFrameH264};

/// 单个图像的解码参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureInfoH264 {
    pub slice_count: u32,
    /// 当前场缺失的一项为 0
    pub field_order_cnt: [i32; 2],
    pub is_reference: bool,
    pub frame_num: u16,
    pub field_pic_flag: bool,
    pub bottom_field_flag: bool,
    pub num_ref_frames: u8,
    pub mb_adaptive_frame_field_flag: bool,
    pub constrained_intra_pred_flag: bool,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_idc: u8,
    pub frame_mbs_only_flag: bool,
    pub transform_8x8_mode_flag: bool,
    pub chroma_qp_index_offset: i8,
    pub second_chroma_qp_index_offset: i8,
    pub pic_init_qp_minus26: i8,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub log2_max_frame_num_minus4: u8,
    pub pic_order_cnt_type: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub delta_pic_order_always_zero_flag: bool,
    pub direct_8x8_inference_flag: bool,
    pub entropy_coding_mode_flag: bool,
    pub pic_order_present_flag: bool,
    pub deblocking_filter_control_present_flag: bool,
    pub redundant_pic_cnt_present_flag: bool,
    /// 光栅顺序
    pub scaling_lists_4x4: [[u8; 16]; 6],
    /// 帧内 Y, 帧间 Y (光栅顺序)
    pub scaling_lists_8x8: [[u8; 64]; 2],
    pub reference_frames: [VdpReferenceFrameH264; MAX_REFERENCE_FRAMES],
}

/// 组装当前编码图像的解码参数
pub fn build_picture_info(
    sps: &Sps,
    pps: &Pps,
    slice: &SliceHeader,
    picture: &CodedPicture,
    reference_frames: [VdpReferenceFrameH264; MAX_REFERENCE_FRAMES],
) -> PictureInfoH264 {
    let field_order_cnt = match picture.structure {
        PictureStructure::Frame => picture.field_order_cnt,
        PictureStructure::TopField => [picture.field_order_cnt[0], 0],
        PictureStructure::BottomField => [0, picture.field_order_cnt[1]],
    };
    let matrix = pps.effective_scaling_matrix(sps);

    PictureInfoH264 {
        slice_count: picture.slice_count,
        field_order_cnt,
        is_reference: picture.is_reference(),
        frame_num: slice.frame_num as u16,
        field_pic_flag: slice.field_pic_flag,
        bottom_field_flag: slice.bottom_field_flag,
        num_ref_frames: sps.max_num_ref_frames as u8,
        mb_adaptive_frame_field_flag: sps.mb_adaptive_frame_field_flag,
        constrained_intra_pred_flag: pps.constrained_intra_pred_flag,
        weighted_pred_flag: pps.weighted_pred_flag,
        weighted_bipred_idc: pps.weighted_bipred_idc as u8,
        frame_mbs_only_flag: sps.frame_mbs_only_flag,
        transform_8x8_mode_flag: pps.transform_8x8_mode_flag,
        chroma_qp_index_offset: pps.chroma_qp_index_offset as i8,
        second_chroma_qp_index_offset: pps.second_chroma_qp_index_offset as i8,
        pic_init_qp_minus26: pps.pic_init_qp_minus26 as i8,
        num_ref_idx_l0_active_minus1: slice.num_ref_idx_l0_active.saturating_sub(1) as u8,
        num_ref_idx_l1_active_minus1: slice.num_ref_idx_l1_active.saturating_sub(1) as u8,
        log2_max_frame_num_minus4: (sps.log2_max_frame_num - 4) as u8,
        pic_order_cnt_type: sps.pic_order_cnt_type as u8,
        log2_max_pic_order_cnt_lsb_minus4: sps.log2_max_pic_order_cnt_lsb.saturating_sub(4)
            as u8,
        delta_pic_order_always_zero_flag: sps.delta_pic_order_always_zero_flag,
        direct_8x8_inference_flag: sps.direct_8x8_inference_flag,
        entropy_coding_mode_flag: pps.entropy_coding_mode_flag,
        pic_order_present_flag: pps.bottom_field_pic_order_in_frame_present_flag,
        deblocking_filter_control_present_flag: pps.deblocking_filter_control_present_flag,
        redundant_pic_cnt_present_flag: pps.redundant_pic_cnt_present_flag,
        scaling_lists_4x4: matrix.lists_4x4,
        scaling_lists_8x8: [matrix.lists_8x8[0], matrix.lists_8x8[1]],
        reference_frames,
    }
}
