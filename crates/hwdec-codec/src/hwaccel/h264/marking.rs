//! 参考图像标记.
//!
//! - 8.2.4.1: FrameNumWrap / PicNum / LongTermPicNum 推导
//! - 8.2.5: IDR 标记与自适应标记 (MMCO 1-6)
//!
//! 滑动窗口由 [`Dpb::add_picture`] 在插入新图像时执行.

use log::{debug, warn};

use crate::parsers::h264::{DecRefPicMarking, MemoryManagementOp, SliceHeader};

use super::dpb::{Dpb, PictureId};
use super::picture::{FrameHandle, PictureStructure};

/// 以当前图像为基准更新 DPB 中全部参考图像的图像编号
pub fn update_pic_nums<F: FrameHandle>(
    dpb: &mut Dpb<F>,
    structure: PictureStructure,
    frame_num: u32,
    max_frame_num: u32,
) {
    for (_, pic) in dpb.iter_mut() {
        if !pic.is_reference() {
            continue;
        }
        let ref_frame_num = pic.frame_num() as i32;
        pic.frame_num_wrap = if pic.frame_num() > frame_num {
            ref_frame_num - max_frame_num as i32
        } else {
            ref_frame_num
        };

        let wrap = pic.frame_num_wrap;
        let long_term_idx = pic.long_term_frame_idx as i32;
        match structure.parity() {
            None => {
                pic.pic_num = [wrap; 2];
                pic.long_term_pic_num = [long_term_idx; 2];
            }
            Some(current) => {
                for parity in 0..2 {
                    let same_parity = i32::from(parity == current);
                    pic.pic_num[parity] = 2 * wrap + same_parity;
                    pic.long_term_pic_num[parity] = 2 * long_term_idx + same_parity;
                }
            }
        }
    }
}

/// 标记过程对当前图像的要求
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkingOutcome {
    /// 当前图像应标记为长期参考时的 LongTermFrameIdx
    pub current_long_term_frame_idx: Option<u32>,
    /// 执行了 MMCO 5
    pub mmco5: bool,
}

/// 参考图像标记状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefPicMarker {
    /// MaxLongTermFrameIdx, `None` 表示 "无长期帧索引"
    max_long_term_frame_idx: Option<u32>,
}

impl RefPicMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.max_long_term_frame_idx = None;
    }

    pub fn max_long_term_frame_idx(&self) -> Option<u32> {
        self.max_long_term_frame_idx
    }

    /// 对参考图像执行标记过程
    ///
    /// 调用前需要先 [`update_pic_nums`]. `first_field` 为当前图像是第二个场时,
    /// 已在 DPB 中的第一个场所属的图像.
    pub fn execute_ref_pic_marking<F: FrameHandle>(
        &mut self,
        dpb: &mut Dpb<F>,
        slice: &SliceHeader,
        structure: PictureStructure,
        first_field: Option<PictureId>,
    ) -> MarkingOutcome {
        let mut outcome = MarkingOutcome::default();
        match &slice.dec_ref_pic_marking {
            None | Some(DecRefPicMarking::SlidingWindow) => {}
            Some(DecRefPicMarking::Idr {
                long_term_reference_flag,
                ..
            }) => {
                if first_field.is_none() {
                    dpb.flush();
                }
                if *long_term_reference_flag {
                    self.max_long_term_frame_idx = Some(0);
                    outcome.current_long_term_frame_idx = Some(0);
                } else {
                    self.max_long_term_frame_idx = None;
                }
            }
            Some(DecRefPicMarking::Adaptive(ops)) => {
                let curr_pic_num = match structure {
                    PictureStructure::Frame => slice.frame_num as i32,
                    _ => 2 * slice.frame_num as i32 + 1,
                };
                for op in ops {
                    self.apply(dpb, *op, curr_pic_num, first_field, &mut outcome);
                }
            }
        }
        outcome
    }

    fn apply<F: FrameHandle>(
        &mut self,
        dpb: &mut Dpb<F>,
        op: MemoryManagementOp,
        curr_pic_num: i32,
        first_field: Option<PictureId>,
        outcome: &mut MarkingOutcome,
    ) {
        debug!("H264: 执行 MMCO {op:?}, curr_pic_num={curr_pic_num}");
        match op {
            MemoryManagementOp::UnmarkShortTerm {
                difference_of_pic_nums_minus1,
            } => {
                let pic_num = curr_pic_num - (difference_of_pic_nums_minus1 as i32 + 1);
                if let Err(err) = dpb.set_unused_ref_picture(pic_num) {
                    warn!("H264: MMCO 1 失败, {err}");
                }
            }
            MemoryManagementOp::UnmarkLongTerm { long_term_pic_num } => {
                if let Err(err) = dpb.set_unused_ref_picture_byltpn(long_term_pic_num as i32) {
                    warn!("H264: MMCO 2 失败, {err}");
                }
            }
            MemoryManagementOp::ShortTermToLongTerm {
                difference_of_pic_nums_minus1,
                long_term_frame_idx,
            } => {
                let pic_num = curr_pic_num - (difference_of_pic_nums_minus1 as i32 + 1);
                let Some(id) = dpb.get_picture(pic_num) else {
                    warn!("H264: MMCO 3 未找到短期参考, pic_num={pic_num}");
                    return;
                };
                if let Err(err) = dpb.mark_long_term(id, long_term_frame_idx) {
                    warn!("H264: MMCO 3 失败, {err}");
                }
            }
            MemoryManagementOp::TrimLongTerm {
                max_long_term_frame_idx_plus1,
            } => {
                let removed = dpb.set_unused_ref_picture_lidx_gt(max_long_term_frame_idx_plus1);
                self.max_long_term_frame_idx = max_long_term_frame_idx_plus1.checked_sub(1);
                debug!(
                    "H264: MaxLongTermFrameIdx={:?}, 清除长期参考 {} 个",
                    self.max_long_term_frame_idx, removed
                );
            }
            MemoryManagementOp::UnmarkAll => {
                dpb.flush();
                self.max_long_term_frame_idx = None;
                outcome.mmco5 = true;
            }
            MemoryManagementOp::MarkCurrentLongTerm {
                long_term_frame_idx,
            } => {
                let occupied = dpb
                    .get_picture_by_ltidx(long_term_frame_idx)
                    .filter(|&other| Some(other) != first_field);
                if occupied.is_some() {
                    if let Err(err) = dpb.set_unused_ref_picture_bylidx(long_term_frame_idx) {
                        warn!("H264: MMCO 6 失败, {err}");
                    }
                }
                outcome.current_long_term_frame_idx = Some(long_term_frame_idx);
            }
        }
    }
}
