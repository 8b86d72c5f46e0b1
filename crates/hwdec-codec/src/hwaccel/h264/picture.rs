//! DPB 中的图像表示.
//!
//! 一个 [`DecodedPicture`] 对应一块硬件表面, 包含一帧或一对互补场
//! (各自是一个 [`CodedPicture`]).

use bitflags::bitflags;

use crate::parsers::h264::SliceHeader;

use super::context::NalContext;

/// 硬件表面句柄 (VdpVideoSurface)
pub type VdpVideoSurface = u32;

/// 无效表面句柄
pub const VDP_INVALID_HANDLE: VdpVideoSurface = 0xFFFF_FFFF;

bitflags! {
    /// 编码图像标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PictureFlags: u8 {
        const IDR = 1 << 0;
        /// nal_ref_idc != 0
        const REFERENCE = 1 << 1;
        const LONG_TERM = 1 << 2;
        /// 包含 memory_management_control_operation 5
        const MMCO5 = 1 << 3;
    }
}

/// 图像结构
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureStructure {
    Frame,
    TopField,
    BottomField,
}

impl PictureStructure {
    pub fn from_slice(slice: &SliceHeader) -> Self {
        match (slice.field_pic_flag, slice.bottom_field_flag) {
            (false, _) => Self::Frame,
            (true, false) => Self::TopField,
            (true, true) => Self::BottomField,
        }
    }

    pub fn is_field(self) -> bool {
        self != Self::Frame
    }

    /// 场的奇偶性下标: 顶场 0, 底场 1
    pub fn parity(self) -> Option<usize> {
        match self {
            Self::Frame => None,
            Self::TopField => Some(0),
            Self::BottomField => Some(1),
        }
    }

    /// 与 `other` 是否为相反奇偶性的场
    pub fn is_opposite_field(self, other: Self) -> bool {
        matches!(
            (self, other),
            (Self::TopField, Self::BottomField) | (Self::BottomField, Self::TopField)
        )
    }
}

/// 外部视频输出管线持有的帧
///
/// DPB 只负责在图像不再被参考且不再等待输出时释放它,
/// 每一帧的 [`FrameHandle::free`] 恰好被调用一次.
pub trait FrameHandle {
    /// 帧对应的硬件表面
    fn surface(&self) -> VdpVideoSurface;

    /// 归还帧
    fn free(self);
}

/// 一个编码图像 (一帧或一场)
#[derive(Debug, Clone)]
pub struct CodedPicture {
    /// 图像第一个切片的上下文
    pub context: NalContext,
    pub structure: PictureStructure,
    pub flags: PictureFlags,
    pub frame_num: u32,
    /// [顶场, 底场] 的 POC, 场图像只有对应奇偶性的一项有效
    pub field_order_cnt: [i32; 2],
    pub slice_count: u32,
}

impl CodedPicture {
    pub fn is_idr(&self) -> bool {
        self.flags.contains(PictureFlags::IDR)
    }

    pub fn is_reference(&self) -> bool {
        self.flags.contains(PictureFlags::REFERENCE)
    }
}

/// DPB 中的一个条目
#[derive(Debug)]
pub struct DecodedPicture<F> {
    pub frame: F,
    /// 第一个解码的帧或场
    pub first: CodedPicture,
    /// 互补场对中的第二个场
    pub second: Option<CodedPicture>,
    pub top_is_reference: bool,
    pub bottom_is_reference: bool,
    pub long_term: bool,
    pub long_term_frame_idx: u32,
    /// FrameNumWrap (8.2.4.1)
    pub frame_num_wrap: i32,
    /// 按奇偶性 [顶, 底] 的 PicNum, 帧解码时两项相同
    pub pic_num: [i32; 2],
    /// 按奇偶性 [顶, 底] 的 LongTermPicNum
    pub long_term_pic_num: [i32; 2],
    /// 尚未交给输出管线
    pub delayed_output: bool,
    pub lock_counter: u32,
}

impl<F> DecodedPicture<F> {
    /// 以首个编码图像创建, 参考标记取自其结构与 nal_ref_idc, 初始持有一次锁
    pub fn new(frame: F, first: CodedPicture) -> Self {
        let reference = first.is_reference();
        let (top_is_reference, bottom_is_reference) = match first.structure {
            PictureStructure::Frame => (reference, reference),
            PictureStructure::TopField => (reference, false),
            PictureStructure::BottomField => (false, reference),
        };
        let frame_num = first.frame_num as i32;
        Self {
            frame,
            first,
            second: None,
            top_is_reference,
            bottom_is_reference,
            long_term: false,
            long_term_frame_idx: 0,
            frame_num_wrap: frame_num,
            pic_num: [frame_num; 2],
            long_term_pic_num: [0; 2],
            delayed_output: true,
            lock_counter: 1,
        }
    }

    pub fn frame_num(&self) -> u32 {
        self.first.frame_num
    }

    pub fn is_idr(&self) -> bool {
        self.first.is_idr()
    }

    /// 至少有一个场被参考
    pub fn is_reference(&self) -> bool {
        self.top_is_reference || self.bottom_is_reference
    }

    pub fn is_short_term_reference(&self) -> bool {
        self.is_reference() && !self.long_term
    }

    pub fn is_long_term_reference(&self) -> bool {
        self.is_reference() && self.long_term
    }

    /// 某一奇偶性 (0 顶, 1 底) 是否被参考
    pub fn parity_is_reference(&self, parity: usize) -> bool {
        match parity {
            0 => self.top_is_reference,
            _ => self.bottom_is_reference,
        }
    }

    /// 帧或场对是否已包含两个场
    pub fn is_complete(&self) -> bool {
        self.first.structure == PictureStructure::Frame || self.second.is_some()
    }

    /// 只包含一个场时的结构
    pub fn single_field(&self) -> Option<PictureStructure> {
        if self.second.is_none() && self.first.structure.is_field() {
            Some(self.first.structure)
        } else {
            None
        }
    }

    /// [顶场 POC, 底场 POC]
    ///
    /// 缺少互补场时, 缺失的一项取已有场的值.
    pub fn field_order_cnt(&self) -> [i32; 2] {
        let mut top = None;
        let mut bottom = None;
        for coded in std::iter::once(&self.first).chain(self.second.as_ref()) {
            match coded.structure {
                PictureStructure::Frame => {
                    top = Some(coded.field_order_cnt[0]);
                    bottom = Some(coded.field_order_cnt[1]);
                }
                PictureStructure::TopField => top = Some(coded.field_order_cnt[0]),
                PictureStructure::BottomField => bottom = Some(coded.field_order_cnt[1]),
            }
        }
        match (top, bottom) {
            (Some(top), Some(bottom)) => [top, bottom],
            (Some(poc), None) | (None, Some(poc)) => [poc, poc],
            (None, None) => [0, 0],
        }
    }

    /// PicOrderCnt: 两个场 POC 的较小值
    pub fn poc(&self) -> i32 {
        let [top, bottom] = self.field_order_cnt();
        top.min(bottom)
    }

    /// 清除全部参考标记
    pub fn mark_unused_for_reference(&mut self) {
        self.top_is_reference = false;
        self.bottom_is_reference = false;
        self.long_term = false;
        self.first.flags.remove(PictureFlags::LONG_TERM);
        if let Some(second) = self.second.as_mut() {
            second.flags.remove(PictureFlags::LONG_TERM);
        }
    }

    /// 标记为长期参考
    pub fn mark_long_term(&mut self, long_term_frame_idx: u32) {
        self.long_term = true;
        self.long_term_frame_idx = long_term_frame_idx;
        self.first.flags.insert(PictureFlags::LONG_TERM);
        if let Some(second) = self.second.as_mut() {
            second.flags.insert(PictureFlags::LONG_TERM);
        }
    }
}
