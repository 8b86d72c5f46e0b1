//! 空解码后端: 不做实际解码, 只记录提交与输出的图像.

use std::cell::Cell;
use std::rc::Rc;

use bytes::Bytes;
use hwdec_codec::hwaccel::h264::VdpVideoSurface;
use hwdec_codec::{DecodedPicture, FrameHandle, HwDecodeBackend, PictureInfoH264, Sps};
use hwdec_core::HwdecResult;
use serde::Serialize;
use tracing::trace;

/// 空后端分配的帧
#[derive(Debug)]
pub struct NullFrame {
    surface: VdpVideoSurface,
    live: Rc<Cell<usize>>,
}

impl FrameHandle for NullFrame {
    fn surface(&self) -> VdpVideoSurface {
        self.surface
    }

    fn free(self) {
        self.live.set(self.live.get().saturating_sub(1));
    }
}

/// 码流参数 (取自最近一次分配表面时的 SPS)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
    pub display_width: u32,
    pub display_height: u32,
    pub chroma_format_idc: u32,
    pub bit_depth: u32,
    pub poc_type: u32,
    pub max_num_ref_frames: u32,
    pub frame_mbs_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_dec_frame_buffering: Option<u32>,
}

impl StreamInfo {
    fn from_sps(sps: &Sps) -> Self {
        Self {
            profile_idc: sps.profile_idc,
            level_idc: sps.level_idc,
            width: sps.width,
            height: sps.height,
            display_width: sps.display_width,
            display_height: sps.display_height,
            chroma_format_idc: sps.chroma_format_idc,
            bit_depth: sps.bit_depth_luma,
            poc_type: sps.pic_order_cnt_type,
            max_num_ref_frames: sps.max_num_ref_frames,
            frame_mbs_only: sps.frame_mbs_only_flag,
            max_dec_frame_buffering: sps.max_dec_frame_buffering(),
        }
    }
}

/// 按显示顺序输出的一帧
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFrame {
    pub surface: VdpVideoSurface,
    pub frame_num: u32,
    pub poc: i32,
    pub field_order_cnt: [i32; 2],
    pub idr: bool,
    /// 帧图像或配对完整的两个场
    pub complete: bool,
}

/// 记录型空后端
#[derive(Debug, Default)]
pub struct NullBackend {
    next_surface: VdpVideoSurface,
    live: Rc<Cell<usize>>,
    pub stream: Option<StreamInfo>,
    pub sps_changes: u32,
    pub submitted: u64,
    pub field_pictures: u64,
    pub output: Vec<OutputFrame>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尚未归还的帧数
    pub fn live_frames(&self) -> usize {
        self.live.get()
    }
}

impl HwDecodeBackend for NullBackend {
    type Frame = NullFrame;

    fn alloc_frame(&mut self, sps: &Sps) -> HwdecResult<NullFrame> {
        let info = StreamInfo::from_sps(sps);
        if self.stream.as_ref() != Some(&info) {
            if self.stream.is_some() {
                self.sps_changes += 1;
            }
            self.stream = Some(info);
        }
        let surface = self.next_surface;
        self.next_surface = self.next_surface.wrapping_add(1);
        self.live.set(self.live.get() + 1);
        Ok(NullFrame {
            surface,
            live: Rc::clone(&self.live),
        })
    }

    fn decode(
        &mut self,
        frame: &NullFrame,
        info: &PictureInfoH264,
        slices: &[Bytes],
    ) -> HwdecResult<()> {
        trace!(
            "提交图像: surface={}, frame_num={}, poc={:?}, slices={}",
            frame.surface,
            info.frame_num,
            info.field_order_cnt,
            slices.len()
        );
        self.submitted += 1;
        if info.field_pic_flag {
            self.field_pictures += 1;
        }
        Ok(())
    }

    fn present(&mut self, picture: &DecodedPicture<NullFrame>) -> HwdecResult<()> {
        self.output.push(OutputFrame {
            surface: picture.frame.surface(),
            frame_num: picture.frame_num(),
            poc: picture.poc(),
            field_order_cnt: picture.field_order_cnt(),
            idr: picture.is_idr(),
            complete: picture.is_complete(),
        });
        Ok(())
    }
}
