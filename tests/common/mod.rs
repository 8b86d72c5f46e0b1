//! 集成测试公共工具: H.264 语法构造器与记录型解码后端.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use hwdec::codec::hwaccel::h264::VdpVideoSurface;
use hwdec::codec::parsers::h264::encode_nal;
use hwdec::codec::{DecodedPicture, FrameHandle, HwDecodeBackend, PictureInfoH264, Sps};
use hwdec::core::{BitWriter, HwdecResult};

pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================
// 码流构造
// ============================================================

/// 序列参数 (默认 320x240 Main, 帧编码, POC 类型 0)
#[derive(Debug, Clone)]
pub struct SeqParams {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub width_mbs: u32,
    pub height_map_units: u32,
    pub frame_mbs_only: bool,
    pub poc_type: u32,
    /// log2_max_frame_num 与 log2_max_pic_order_cnt_lsb 都取 8
    pub num_ref_frames: u32,
}

impl Default for SeqParams {
    fn default() -> Self {
        Self {
            profile_idc: 77,
            level_idc: 30,
            width_mbs: 20,
            height_map_units: 15,
            frame_mbs_only: true,
            poc_type: 0,
            num_ref_frames: 4,
        }
    }
}

/// 切片类型语法值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    I,
    P,
    B,
}

impl Kind {
    fn slice_type(self) -> u32 {
        match self {
            Self::P => 5,
            Self::B => 6,
            Self::I => 7,
        }
    }
}

/// 一个切片的构造参数
#[derive(Debug, Clone)]
pub struct Pic {
    pub kind: Kind,
    pub idr: bool,
    pub nal_ref_idc: u8,
    pub frame_num: u32,
    pub poc_lsb: u32,
    /// Some(bottom_field_flag) 表示场图像
    pub field: Option<bool>,
    pub first_mb: u32,
    pub idr_pic_id: u32,
    /// (mmco, 参数 1, 参数 2)
    pub mmco: Vec<(u32, u32, u32)>,
}

impl Pic {
    pub fn idr(idr_pic_id: u32) -> Self {
        Self {
            kind: Kind::I,
            idr: true,
            nal_ref_idc: 3,
            frame_num: 0,
            poc_lsb: 0,
            field: None,
            first_mb: 0,
            idr_pic_id,
            mmco: Vec::new(),
        }
    }

    pub fn p(frame_num: u32, poc_lsb: u32) -> Self {
        Self {
            kind: Kind::P,
            idr: false,
            nal_ref_idc: 2,
            frame_num,
            poc_lsb,
            ..Self::idr(0)
        }
    }

    /// 非参考 B 图像
    pub fn b(frame_num: u32, poc_lsb: u32) -> Self {
        Self {
            kind: Kind::B,
            nal_ref_idc: 0,
            ..Self::p(frame_num, poc_lsb)
        }
    }

    pub fn field(self, bottom: bool) -> Self {
        Self {
            field: Some(bottom),
            ..self
        }
    }

    pub fn with_mmco(self, mmco: Vec<(u32, u32, u32)>) -> Self {
        Self { mmco, ..self }
    }
}

pub fn nal(nal_ref_idc: u8, nal_unit_type: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut out = vec![(nal_ref_idc << 5) | nal_unit_type];
    out.extend(encode_nal(rbsp));
    out
}

pub fn sps_nal(seq: &SeqParams) -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(u32::from(seq.profile_idc), 8);
    bw.write_bits(0, 8);
    bw.write_bits(u32::from(seq.level_idc), 8);
    bw.write_ue(0);
    bw.write_ue(4); // log2_max_frame_num_minus4
    bw.write_ue(seq.poc_type);
    if seq.poc_type == 0 {
        bw.write_ue(4);
    }
    bw.write_ue(seq.num_ref_frames);
    bw.write_flag(false);
    bw.write_ue(seq.width_mbs - 1);
    bw.write_ue(seq.height_map_units - 1);
    bw.write_flag(seq.frame_mbs_only);
    if !seq.frame_mbs_only {
        bw.write_flag(false);
    }
    bw.write_flag(true);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_rbsp_trailing_bits();
    nal(3, 7, &bw.finish())
}

pub fn pps_nal() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_ue(0);
    bw.write_ue(0);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_ue(0);
    bw.write_ue(0);
    bw.write_ue(0);
    bw.write_flag(false);
    bw.write_bits(0, 2);
    bw.write_se(0);
    bw.write_se(0);
    bw.write_se(0);
    bw.write_flag(true);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_rbsp_trailing_bits();
    nal(3, 8, &bw.finish())
}

pub fn slice_nal(seq: &SeqParams, pic: &Pic) -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_ue(pic.first_mb);
    bw.write_ue(pic.kind.slice_type());
    bw.write_ue(0);
    bw.write_bits(pic.frame_num, 8);
    if !seq.frame_mbs_only {
        bw.write_flag(pic.field.is_some());
        if let Some(bottom) = pic.field {
            bw.write_flag(bottom);
        }
    }
    if pic.idr {
        bw.write_ue(pic.idr_pic_id);
    }
    if seq.poc_type == 0 {
        bw.write_bits(pic.poc_lsb, 8);
    }
    if pic.kind == Kind::B {
        bw.write_flag(true);
    }
    if pic.kind != Kind::I {
        bw.write_flag(false);
        bw.write_flag(false);
        if pic.kind == Kind::B {
            bw.write_flag(false);
        }
    }
    if pic.nal_ref_idc != 0 {
        if pic.idr {
            bw.write_flag(false);
            bw.write_flag(false);
        } else if pic.mmco.is_empty() {
            bw.write_flag(false);
        } else {
            bw.write_flag(true);
            for &(op, a, b) in &pic.mmco {
                bw.write_ue(op);
                match op {
                    1 | 2 | 4 | 6 => bw.write_ue(a),
                    3 => {
                        bw.write_ue(a);
                        bw.write_ue(b);
                    }
                    _ => {}
                }
            }
            bw.write_ue(0);
        }
    }
    bw.write_se(0);
    bw.write_ue(0);
    bw.write_se(0);
    bw.write_se(0);
    // 模拟宏块数据: 字节对齐的 00 00 01 需要插入防竞争字节
    bw.align_to_byte();
    bw.write_bits(0, 16);
    bw.write_bits(0x01A5, 16);
    bw.write_rbsp_trailing_bits();
    let nal_unit_type = if pic.idr { 5 } else { 1 };
    nal(pic.nal_ref_idc, nal_unit_type, &bw.finish())
}

/// 参数集 + 全部切片
pub fn stream(seq: &SeqParams, pics: &[Pic]) -> Vec<Vec<u8>> {
    let mut units = vec![sps_nal(seq), pps_nal()];
    units.extend(pics.iter().map(|pic| slice_nal(seq, pic)));
    units
}

pub fn annex_b(units: &[Vec<u8>]) -> Bytes {
    let mut out = Vec::new();
    for unit in units {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(unit);
    }
    Bytes::from(out)
}

/// 4 字节长度前缀样本
pub fn length_prefixed(units: &[Vec<u8>]) -> Bytes {
    let mut out = Vec::new();
    for unit in units {
        out.extend_from_slice(&(unit.len() as u32).to_be_bytes());
        out.extend_from_slice(unit);
    }
    Bytes::from(out)
}

pub fn avcc_config(sps: &[u8], pps: &[u8]) -> Bytes {
    let mut out = vec![1, sps[1], sps[2], sps[3], 0xFF, 0xE1];
    out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    out.extend_from_slice(sps);
    out.push(1);
    out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    out.extend_from_slice(pps);
    Bytes::from(out)
}

// ============================================================
// 记录型后端
// ============================================================

pub type FreeLog = Rc<RefCell<Vec<VdpVideoSurface>>>;

#[derive(Debug)]
pub struct RecordedFrame {
    surface: VdpVideoSurface,
    freed: FreeLog,
}

impl FrameHandle for RecordedFrame {
    fn surface(&self) -> VdpVideoSurface {
        self.surface
    }

    fn free(self) {
        self.freed.borrow_mut().push(self.surface);
    }
}

/// 一次 decode 调用
#[derive(Debug, Clone)]
pub struct Submission {
    pub surface: VdpVideoSurface,
    pub info: PictureInfoH264,
    pub slices: usize,
}

/// 一次 present 调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presentation {
    pub surface: VdpVideoSurface,
    pub frame_num: u32,
    pub poc: i32,
    pub complete: bool,
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    next_surface: VdpVideoSurface,
    pub allocated: Vec<VdpVideoSurface>,
    pub freed: FreeLog,
    pub submitted: Vec<Submission>,
    pub presented: Vec<Presentation>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            next_surface: 100,
            ..Self::default()
        }
    }

    pub fn presented_pocs(&self) -> Vec<i32> {
        self.presented.iter().map(|p| p.poc).collect()
    }

    pub fn freed_sorted(&self) -> Vec<VdpVideoSurface> {
        let mut freed = self.freed.borrow().clone();
        freed.sort_unstable();
        freed
    }
}

impl HwDecodeBackend for RecordingBackend {
    type Frame = RecordedFrame;

    fn alloc_frame(&mut self, _sps: &Sps) -> HwdecResult<RecordedFrame> {
        let surface = self.next_surface;
        self.next_surface += 1;
        self.allocated.push(surface);
        Ok(RecordedFrame {
            surface,
            freed: Rc::clone(&self.freed),
        })
    }

    fn decode(
        &mut self,
        frame: &RecordedFrame,
        info: &PictureInfoH264,
        slices: &[Bytes],
    ) -> HwdecResult<()> {
        self.submitted.push(Submission {
            surface: frame.surface,
            info: info.clone(),
            slices: slices.len(),
        });
        Ok(())
    }

    fn present(&mut self, picture: &DecodedPicture<RecordedFrame>) -> HwdecResult<()> {
        self.presented.push(Presentation {
            surface: picture.frame.surface(),
            frame_num: picture.frame_num(),
            poc: picture.poc(),
            complete: picture.is_complete(),
        });
        Ok(())
    }
}
