use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use hwdec_core::{HwdecError, HwdecResult};

use crate::parsers::h264::test_streams::{
    PpsParams, SliceParams, SpsParams, nal_unit, pps_rbsp, slice_rbsp, sps_rbsp,
};
use crate::parsers::h264::{
    NalUnit, NalUnitType, SliceHeader, Sps, parse_pps, parse_slice_header, parse_sps,
};

use super::super::{
    CodedPicture, DecodedPicture, FrameHandle, HwDecodeBackend, NalContext, PictureFlags,
    PictureInfoH264, PictureStructure, VdpVideoSurface,
};

pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 记录被释放的表面
pub type ReleaseLog = Rc<RefCell<Vec<VdpVideoSurface>>>;

#[derive(Debug)]
pub struct TestFrame {
    pub surface: VdpVideoSurface,
    pub released: ReleaseLog,
}

impl FrameHandle for TestFrame {
    fn surface(&self) -> VdpVideoSurface {
        self.surface
    }

    fn free(self) {
        self.released.borrow_mut().push(self.surface);
    }
}

pub fn new_release_log() -> ReleaseLog {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn coded_frame(frame_num: u32, poc: i32, reference: bool) -> CodedPicture {
    let mut flags = PictureFlags::empty();
    if reference {
        flags |= PictureFlags::REFERENCE;
    }
    CodedPicture {
        context: NalContext::default(),
        structure: PictureStructure::Frame,
        flags,
        frame_num,
        field_order_cnt: [poc, poc],
        slice_count: 1,
    }
}

pub fn test_picture(
    log: &ReleaseLog,
    surface: VdpVideoSurface,
    frame_num: u32,
    poc: i32,
    reference: bool,
) -> DecodedPicture<TestFrame> {
    let frame = TestFrame {
        surface,
        released: Rc::clone(log),
    };
    DecodedPicture::new(frame, coded_frame(frame_num, poc, reference))
}

/// 提交给后端的一次解码
#[derive(Debug, Clone)]
pub struct SubmittedPicture {
    pub surface: VdpVideoSurface,
    pub info: PictureInfoH264,
    pub slice_count: usize,
}

/// 交付输出的一个图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedPicture {
    pub surface: VdpVideoSurface,
    pub frame_num: u32,
    pub poc: i32,
    pub complete: bool,
}

#[derive(Debug, Default)]
pub struct MockBackend {
    next_surface: VdpVideoSurface,
    pub released: ReleaseLog,
    pub submitted: Vec<SubmittedPicture>,
    pub presented: Vec<PresentedPicture>,
    pub fail_decode: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            next_surface: 100,
            ..Self::default()
        }
    }

    pub fn presented_pocs(&self) -> Vec<i32> {
        self.presented.iter().map(|p| p.poc).collect()
    }

    pub fn released_count(&self) -> usize {
        self.released.borrow().len()
    }
}

impl HwDecodeBackend for MockBackend {
    type Frame = TestFrame;

    fn alloc_frame(&mut self, _sps: &Sps) -> HwdecResult<TestFrame> {
        let surface = self.next_surface;
        self.next_surface += 1;
        Ok(TestFrame {
            surface,
            released: Rc::clone(&self.released),
        })
    }

    fn decode(
        &mut self,
        frame: &TestFrame,
        info: &PictureInfoH264,
        slices: &[Bytes],
    ) -> HwdecResult<()> {
        if self.fail_decode {
            return Err(HwdecError::Backend("模拟解码失败".into()));
        }
        self.submitted.push(SubmittedPicture {
            surface: frame.surface,
            info: info.clone(),
            slice_count: slices.len(),
        });
        Ok(())
    }

    fn present(&mut self, picture: &DecodedPicture<TestFrame>) -> HwdecResult<()> {
        self.presented.push(PresentedPicture {
            surface: picture.frame.surface,
            frame_num: picture.frame_num(),
            poc: picture.poc(),
            complete: picture.is_complete(),
        });
        Ok(())
    }
}

pub fn sps_nal(params: &SpsParams) -> Bytes {
    Bytes::from(nal_unit(3, 7, &sps_rbsp(params)))
}

pub fn pps_nal(params: &PpsParams) -> Bytes {
    Bytes::from(nal_unit(3, 8, &pps_rbsp(params)))
}

pub fn slice_nal(sps: &SpsParams, pps: &PpsParams, slice: &SliceParams) -> Bytes {
    Bytes::from(nal_unit(
        slice.nal_ref_idc,
        slice.nal_unit_type,
        &slice_rbsp(sps, pps, slice),
    ))
}

pub fn parse_nal(data: Bytes) -> NalUnit {
    NalUnit::parse(data).expect("测试 NAL 头部应合法")
}

/// 解析构造出的 SPS 与切片头
pub fn parse_headers(sps: &SpsParams, pps: &PpsParams, slice: &SliceParams) -> (Sps, SliceHeader) {
    let parsed_sps = parse_sps(&sps_rbsp(sps)).expect("测试 SPS 应合法");
    let parsed_pps = parse_pps(&pps_rbsp(pps), Some(&parsed_sps)).expect("测试 PPS 应合法");
    let header = parse_slice_header(
        &slice_rbsp(sps, pps, slice),
        NalUnitType::from_type_id(slice.nal_unit_type),
        slice.nal_ref_idc,
        &parsed_sps,
        &parsed_pps,
    )
    .expect("测试切片头应合法");
    (parsed_sps, header)
}

/// 以 Annex B 起始码拼接 NAL 单元
pub fn annex_b(nals: &[Bytes]) -> Bytes {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    Bytes::from(out)
}
