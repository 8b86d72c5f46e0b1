//! 图像顺序计数 (POC) 计算 (8.2.1).
//!
//! 结果为 [顶场 POC, 底场 POC]; 场图像只填写对应奇偶性的一项, 另一项为 0.

use crate::parsers::h264::{SliceHeader, Sps};

use super::picture::PictureStructure;

/// 跨图像保存的 POC 推导状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PocState {
    /// 类型 0: 上一个参考图像的 PicOrderCntMsb / pic_order_cnt_lsb
    prev_pic_order_cnt_msb: i64,
    prev_pic_order_cnt_lsb: i64,
    /// 类型 1/2: 上一个图像的 FrameNumOffset / frame_num
    prev_frame_num_offset: i64,
    prev_frame_num: u32,
}

impl PocState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 计算当前图像的 POC 并更新状态
    pub fn compute(
        &mut self,
        sps: &Sps,
        slice: &SliceHeader,
        nal_ref_idc: u8,
        idr: bool,
    ) -> [i32; 2] {
        let structure = PictureStructure::from_slice(slice);
        let mmco5 = slice.has_mmco5();
        let frame_num_offset = self.frame_num_offset(sps, slice, idr);

        let foc = match sps.pic_order_cnt_type {
            0 => self.compute_type0(sps, slice, nal_ref_idc, idr, structure, mmco5),
            1 => compute_type1(sps, slice, nal_ref_idc, structure, frame_num_offset),
            _ => compute_type2(slice, nal_ref_idc, idr, structure, frame_num_offset),
        };

        self.prev_frame_num_offset = if mmco5 { 0 } else { frame_num_offset };
        self.prev_frame_num = if mmco5 { 0 } else { slice.frame_num };

        foc.map(clamp_i32)
    }

    fn compute_type0(
        &mut self,
        sps: &Sps,
        slice: &SliceHeader,
        nal_ref_idc: u8,
        idr: bool,
        structure: PictureStructure,
        mmco5: bool,
    ) -> [i64; 2] {
        if idr {
            self.prev_pic_order_cnt_msb = 0;
            self.prev_pic_order_cnt_lsb = 0;
        }

        let max_lsb = i64::from(sps.max_pic_order_cnt_lsb());
        let lsb = i64::from(slice.pic_order_cnt_lsb);
        let prev_msb = self.prev_pic_order_cnt_msb;
        let prev_lsb = self.prev_pic_order_cnt_lsb;

        let msb = if lsb < prev_lsb && prev_lsb - lsb >= max_lsb / 2 {
            prev_msb + max_lsb
        } else if lsb > prev_lsb && lsb - prev_lsb > max_lsb / 2 {
            prev_msb - max_lsb
        } else {
            prev_msb
        };

        let foc = match structure {
            PictureStructure::Frame => {
                let top = msb + lsb;
                [top, top + i64::from(slice.delta_pic_order_cnt_bottom)]
            }
            PictureStructure::TopField => [msb + lsb, 0],
            PictureStructure::BottomField => [0, msb + lsb],
        };

        if nal_ref_idc != 0 {
            if mmco5 {
                // 8.2.1: 含 MMCO 5 的图像之后以 tempPicOrderCnt 复位后的顶场 POC 为基准
                self.prev_pic_order_cnt_msb = 0;
                self.prev_pic_order_cnt_lsb = match structure {
                    PictureStructure::Frame => foc[0] - foc[0].min(foc[1]),
                    _ => 0,
                };
            } else {
                self.prev_pic_order_cnt_msb = msb;
                self.prev_pic_order_cnt_lsb = lsb;
            }
        }
        foc
    }

    fn frame_num_offset(&self, sps: &Sps, slice: &SliceHeader, idr: bool) -> i64 {
        if idr {
            0
        } else if self.prev_frame_num > slice.frame_num {
            self.prev_frame_num_offset + i64::from(sps.max_frame_num())
        } else {
            self.prev_frame_num_offset
        }
    }
}

fn compute_type1(
    sps: &Sps,
    slice: &SliceHeader,
    nal_ref_idc: u8,
    structure: PictureStructure,
    frame_num_offset: i64,
) -> [i64; 2] {
    let cycle = &sps.offset_for_ref_frame;
    let cycle_len = cycle.len() as i64;

    let mut abs_frame_num = if cycle_len != 0 {
        frame_num_offset + i64::from(slice.frame_num)
    } else {
        0
    };
    if nal_ref_idc == 0 && abs_frame_num > 0 {
        abs_frame_num -= 1;
    }

    let mut expected = 0i64;
    if abs_frame_num > 0 {
        let cycle_cnt = (abs_frame_num - 1) / cycle_len;
        let in_cycle = ((abs_frame_num - 1) % cycle_len) as usize;
        let delta_per_cycle: i64 = cycle.iter().map(|&v| i64::from(v)).sum();
        let partial: i64 = cycle[..=in_cycle].iter().map(|&v| i64::from(v)).sum();
        expected = cycle_cnt.saturating_mul(delta_per_cycle).saturating_add(partial);
    }
    if nal_ref_idc == 0 {
        expected += i64::from(sps.offset_for_non_ref_pic);
    }

    let delta = slice.delta_pic_order_cnt.map(i64::from);
    let top_to_bottom = i64::from(sps.offset_for_top_to_bottom_field);
    match structure {
        PictureStructure::Frame => {
            let top = expected + delta[0];
            [top, top + top_to_bottom + delta[1]]
        }
        PictureStructure::TopField => [expected + delta[0], 0],
        PictureStructure::BottomField => [0, expected + top_to_bottom + delta[0]],
    }
}

fn compute_type2(
    slice: &SliceHeader,
    nal_ref_idc: u8,
    idr: bool,
    structure: PictureStructure,
    frame_num_offset: i64,
) -> [i64; 2] {
    let temp = if idr {
        0
    } else if nal_ref_idc == 0 {
        2 * (frame_num_offset + i64::from(slice.frame_num)) - 1
    } else {
        2 * (frame_num_offset + i64::from(slice.frame_num))
    };
    match structure {
        PictureStructure::Frame => [temp, temp],
        PictureStructure::TopField => [temp, 0],
        PictureStructure::BottomField => [0, temp],
    }
}

/// 含 MMCO 5 的图像解码后的 POC (减去 tempPicOrderCnt)
pub fn mmco5_adjusted(field_order_cnt: [i32; 2], structure: PictureStructure) -> [i32; 2] {
    let [top, bottom] = field_order_cnt;
    match structure {
        PictureStructure::Frame => {
            let temp = top.min(bottom);
            [top.saturating_sub(temp), bottom.saturating_sub(temp)]
        }
        PictureStructure::TopField => [0, bottom],
        PictureStructure::BottomField => [top, 0],
    }
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}
