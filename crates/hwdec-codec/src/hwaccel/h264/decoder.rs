//! H.264 硬件解码驱动.
//!
//! 累积同一访问单元的切片, 在访问单元结束时:
//! 1. 分配表面 (互补场的第二个场复用第一个场的表面)
//! 2. 计算 POC 与图像编号, 组装解码参数并提交给后端
//! 3. 执行参考图像标记, 插入 DPB
//! 4. 按 POC 顺序通过 [`HwDecodeBackend::present`] 输出图像

use std::sync::Arc;

use bytes::Bytes;
use hwdec_core::{HwdecError, HwdecResult};
use log::{debug, warn};

use crate::parsers::h264::{
    NalUnit, SliceHeader, Sps, parse_avcc_config, split_annex_b, split_avcc,
};

use super::config::DecoderConfig;
use super::context::{NalContext, NalOutcome, NalParser, ParsedNal};
use super::dpb::{Dpb, PictureId};
use super::marking::{MarkingOutcome, RefPicMarker, update_pic_nums};
use super::picture::{
    CodedPicture, DecodedPicture, FrameHandle, PictureFlags, PictureStructure,
};
use super::picture_info::{PictureInfoH264, build_picture_info};
use super::poc::{PocState, mmco5_adjusted};
use super::reflist::fill_vdpau_reference_list;

/// 硬件解码后端
pub trait HwDecodeBackend {
    type Frame: FrameHandle;

    /// 为新的帧或首个场分配表面
    fn alloc_frame(&mut self, sps: &Sps) -> HwdecResult<Self::Frame>;

    /// 提交一个编码图像
    ///
    /// `slices` 为该图像的全部切片 NAL 单元 (含 NAL 头部, 不含起始码).
    fn decode(
        &mut self,
        frame: &Self::Frame,
        info: &PictureInfoH264,
        slices: &[Bytes],
    ) -> HwdecResult<()>;

    /// 按显示顺序交付图像
    fn present(&mut self, picture: &DecodedPicture<Self::Frame>) -> HwdecResult<()>;
}

/// 解码统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub nals: u64,
    pub slices: u64,
    pub access_units: u64,
    /// 提交给后端的编码图像 (帧或场)
    pub pictures_decoded: u64,
    pub pictures_output: u64,
    pub idr_pictures: u64,
    pub dropped_nals: u64,
    pub dropped_pictures: u64,
}

/// 正在累积的访问单元
#[derive(Debug)]
struct AccessUnit {
    context: NalContext,
    slices: Vec<Bytes>,
}

/// H.264 硬件解码驱动
pub struct H264HwDecoder<B: HwDecodeBackend> {
    dpb: Dpb<B::Frame>,
    backend: B,
    config: DecoderConfig,
    parser: NalParser,
    poc: PocState,
    marker: RefPicMarker,
    pending: Option<AccessUnit>,
    active_sps: Option<Arc<Sps>>,
    /// 最近插入 DPB 的图像, 用于互补场配对
    last_added: Option<PictureId>,
    /// AVCC 输入的 NAL 长度前缀大小, `None` 表示 Annex B
    length_size: Option<usize>,
    stats: DecoderStats,
}

impl<B: HwDecodeBackend> H264HwDecoder<B> {
    pub fn new(backend: B, config: DecoderConfig) -> Self {
        Self {
            dpb: Dpb::new(config.effective_dpb_size()),
            backend,
            config,
            parser: NalParser::new(),
            poc: PocState::new(),
            marker: RefPicMarker::new(),
            pending: None,
            active_sps: None,
            last_added: None,
            length_size: None,
            stats: DecoderStats::default(),
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn dpb(&self) -> &Dpb<B::Frame> {
        &self.dpb
    }

    pub fn parser(&self) -> &NalParser {
        &self.parser
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// 释放全部图像并取回后端
    pub fn into_backend(mut self) -> B {
        self.dpb.free_all();
        self.backend
    }

    /// 处理一个 NAL 单元 (含头部, 不含起始码)
    ///
    /// 语法错误与缺失参数集只会丢弃对应的 NAL 或图像;
    /// 内存分配失败与后端错误向外传播.
    pub fn decode_nal(&mut self, data: Bytes) -> HwdecResult<()> {
        match NalUnit::parse(data) {
            Ok(nal) => self.process_nal(nal),
            Err(err) => {
                self.stats.nals += 1;
                self.stats.dropped_nals += 1;
                warn!("H264: 丢弃 NAL, {err}");
                Ok(())
            }
        }
    }

    /// 处理一个数据包: Annex B 字节流, 或加载 avcC 后的长度前缀样本
    pub fn decode_packet(&mut self, data: &Bytes) -> HwdecResult<()> {
        let nalus = match self.length_size {
            Some(length_size) => match split_avcc(data, length_size) {
                Ok(nalus) => nalus,
                Err(err) => {
                    warn!("H264: 丢弃数据包, len={}, {}", data.len(), err);
                    return Ok(());
                }
            },
            None => split_annex_b(data),
        };
        for nal in nalus {
            self.process_nal(nal)?;
        }
        Ok(())
    }

    /// 加载 MP4 avcC 配置: 登记其中的 SPS/PPS, 之后的数据包按长度前缀分割
    pub fn load_avcc_config(&mut self, data: &Bytes) -> HwdecResult<()> {
        let config = parse_avcc_config(data)?;
        debug!(
            "H264: avcC profile={}, level={}, length_size={}, sps={}, pps={}",
            config.profile_idc,
            config.level_idc,
            config.length_size,
            config.sps_list.len(),
            config.pps_list.len()
        );
        self.length_size = Some(config.length_size);
        for nal in config.sps_list.into_iter().chain(config.pps_list) {
            self.decode_nal(nal)?;
        }
        Ok(())
    }

    /// 提交正在累积的访问单元并按 POC 顺序输出全部等待中的图像
    pub fn flush(&mut self) -> HwdecResult<()> {
        self.finish_access_unit()?;
        self.drain()
    }

    /// 丢弃全部解码状态 (参数集保留)
    pub fn reset(&mut self) {
        self.pending = None;
        self.dpb.free_all();
        self.poc.reset();
        self.marker.reset();
        self.parser.reset();
        self.active_sps = None;
        self.last_added = None;
    }

    fn process_nal(&mut self, nal: NalUnit) -> HwdecResult<()> {
        self.stats.nals += 1;
        let parsed = match self.parser.parse_nal(&nal) {
            Ok(parsed) => parsed,
            Err(err @ HwdecError::OutOfMemory(_)) => return Err(err),
            Err(err) => {
                self.stats.dropped_nals += 1;
                warn!("H264: 丢弃 NAL, type={}, {}", nal.nal_type, err);
                return Ok(());
            }
        };

        match parsed {
            ParsedNal::Slice(NalOutcome::NewAccessUnit) => {
                self.stats.slices += 1;
                self.finish_access_unit()?;
                self.pending = Some(AccessUnit {
                    context: self.parser.current().clone(),
                    slices: vec![nal.data],
                });
            }
            ParsedNal::Slice(NalOutcome::SliceContinues) => {
                self.stats.slices += 1;
                match self.pending.as_mut() {
                    Some(au) => au.slices.push(nal.data),
                    None => {
                        self.pending = Some(AccessUnit {
                            context: self.parser.current().clone(),
                            slices: vec![nal.data],
                        });
                    }
                }
            }
            ParsedNal::Sps(_) | ParsedNal::Pps(_) => {}
            ParsedNal::EndOfSequence => {
                self.finish_access_unit()?;
                self.end_sequence()?;
            }
            ParsedNal::EndOfStream => {
                self.finish_access_unit()?;
                self.drain()?;
            }
            ParsedNal::Other(nal_type) => debug!("H264: 忽略 NAL, type={nal_type}"),
        }
        Ok(())
    }

    fn finish_access_unit(&mut self) -> HwdecResult<()> {
        let Some(au) = self.pending.take() else {
            return Ok(());
        };
        self.stats.access_units += 1;
        match self.decode_access_unit(au) {
            Err(err @ (HwdecError::OutOfMemory(_) | HwdecError::Backend(_))) => Err(err),
            Err(err) => {
                self.stats.dropped_pictures += 1;
                warn!("H264: 丢弃图像, {err}");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn decode_access_unit(&mut self, au: AccessUnit) -> HwdecResult<()> {
        let AccessUnit { context, slices } = au;
        let Some((sps, pps, slice)) = context.parts() else {
            return Err(HwdecError::InvalidArgument(
                "H264: 访问单元缺少参数集或切片头".into(),
            ));
        };
        let (sps, pps, slice) = (Arc::clone(sps), Arc::clone(pps), slice.clone());
        let structure = PictureStructure::from_slice(&slice);
        let idr = context.is_idr();
        let nal_ref_idc = context.nal_ref_idc;

        self.activate_sps(&sps)?;

        let first_field = if structure.is_field() && self.config.pair_fields {
            self.find_first_field(&slice, structure)
        } else {
            None
        };
        if idr && first_field.is_none() {
            self.handle_idr(&slice)?;
        }

        let field_order_cnt = self.poc.compute(&sps, &slice, nal_ref_idc, idr);
        update_pic_nums(&mut self.dpb, structure, slice.frame_num, sps.max_frame_num());

        let mut flags = PictureFlags::empty();
        if idr {
            flags |= PictureFlags::IDR;
        }
        if nal_ref_idc != 0 {
            flags |= PictureFlags::REFERENCE;
        }
        let mut coded = CodedPicture {
            context,
            structure,
            flags,
            frame_num: slice.frame_num,
            field_order_cnt,
            slice_count: slices.len() as u32,
        };

        let references = fill_vdpau_reference_list(&self.dpb);
        let info = build_picture_info(&sps, &pps, &slice, &coded, references);
        debug!(
            "H264: 提交图像, type={}, frame_num={}, structure={:?}, poc={:?}, slices={}",
            slice.slice_type,
            slice.frame_num,
            structure,
            field_order_cnt,
            slices.len()
        );

        let Some(first_id) = first_field else {
            let frame = self.backend.alloc_frame(&sps)?;
            if let Err(err) = self.backend.decode(&frame, &info, &slices) {
                frame.free();
                return Err(err);
            }
            self.stats.pictures_decoded += 1;

            let outcome = self.mark(&slice, structure, None, &mut coded);
            // MMCO 5 之前的图像先于当前图像输出
            if outcome.mmco5 && self.config.drain_on_idr {
                if let Err(err) = self.drain() {
                    frame.free();
                    return Err(err);
                }
            }
            let mut pic = DecodedPicture::new(frame, coded);
            if let Some(idx) = outcome.current_long_term_frame_idx {
                pic.mark_long_term(idx);
            }
            let id = self.dpb.add_picture(pic, sps.max_num_ref_frames)?;
            self.last_added = Some(id);

            // 首个场等待互补场到达后再参与输出
            if !(structure.is_field() && self.config.pair_fields) {
                self.bump()?;
            }
            return Ok(());
        };

        let Some(first) = self.dpb.picture(first_id) else {
            return Err(HwdecError::InvalidArgument(format!(
                "H264: 第一个场已不在 DPB 中, id={}",
                first_id.index()
            )));
        };
        self.backend.decode(&first.frame, &info, &slices)?;
        self.stats.pictures_decoded += 1;

        let outcome = self.mark(&slice, structure, Some(first_id), &mut coded);
        self.attach_second_field(first_id, coded, outcome)?;
        self.bump()
    }

    /// 执行参考图像标记, MMCO 5 时复位当前图像的 POC 与 frame_num
    fn mark(
        &mut self,
        slice: &SliceHeader,
        structure: PictureStructure,
        first_field: Option<PictureId>,
        coded: &mut CodedPicture,
    ) -> MarkingOutcome {
        if !coded.is_reference() {
            return MarkingOutcome::default();
        }
        let outcome =
            self.marker
                .execute_ref_pic_marking(&mut self.dpb, slice, structure, first_field);
        if outcome.mmco5 {
            coded.flags |= PictureFlags::MMCO5;
            coded.field_order_cnt = mmco5_adjusted(coded.field_order_cnt, structure);
            coded.frame_num = 0;
        }
        outcome
    }

    fn attach_second_field(
        &mut self,
        id: PictureId,
        coded: CodedPicture,
        outcome: MarkingOutcome,
    ) -> HwdecResult<()> {
        let Some(pic) = self.dpb.picture_mut(id) else {
            return Err(HwdecError::InvalidArgument(format!(
                "H264: 第一个场已不在 DPB 中, id={}",
                id.index()
            )));
        };
        let reference = coded.is_reference();
        match coded.structure {
            PictureStructure::TopField => pic.top_is_reference = reference,
            PictureStructure::BottomField => pic.bottom_is_reference = reference,
            PictureStructure::Frame => {}
        }
        pic.second = Some(coded);
        self.last_added = None;

        if let Some(idx) = outcome.current_long_term_frame_idx {
            self.dpb.mark_long_term(id, idx)?;
        }
        Ok(())
    }

    /// 最近插入的图像是否为当前场的互补场
    fn find_first_field(
        &self,
        slice: &SliceHeader,
        structure: PictureStructure,
    ) -> Option<PictureId> {
        let id = self.last_added?;
        let pic = self.dpb.picture(id)?;
        let first = pic.single_field()?;
        (first.is_opposite_field(structure) && pic.frame_num() == slice.frame_num).then_some(id)
    }

    fn handle_idr(&mut self, slice: &SliceHeader) -> HwdecResult<()> {
        self.stats.idr_pictures += 1;
        if slice.no_output_of_prior_pics() {
            debug!("H264: no_output_of_prior_pics_flag=1, 丢弃等待输出的图像");
            self.dpb.discard_pending_output();
        } else if self.config.drain_on_idr {
            self.drain()?;
        }
        self.dpb.flush();
        self.marker.reset();
        self.last_added = None;
        Ok(())
    }

    /// 序列参数集变化 (分辨率, 参考帧数, 色度格式) 时输出并清空 DPB
    fn activate_sps(&mut self, sps: &Arc<Sps>) -> HwdecResult<()> {
        let changed = self.active_sps.as_ref().is_some_and(|active| {
            !Arc::ptr_eq(active, sps)
                && (active.width != sps.width
                    || active.height != sps.height
                    || active.max_num_ref_frames != sps.max_num_ref_frames
                    || active.chroma_format_idc != sps.chroma_format_idc
                    || active.bit_depth_luma != sps.bit_depth_luma)
        });
        if changed {
            debug!(
                "H264: 序列参数变化, sps_id={}, {}x{}, num_ref_frames={}",
                sps.sps_id, sps.width, sps.height, sps.max_num_ref_frames
            );
            self.drain()?;
            self.dpb.flush();
            self.poc.reset();
            self.marker.reset();
            self.last_added = None;
        }
        self.active_sps = Some(Arc::clone(sps));
        Ok(())
    }

    fn end_sequence(&mut self) -> HwdecResult<()> {
        self.drain()?;
        self.dpb.flush();
        self.poc.reset();
        self.marker.reset();
        self.parser.reset();
        self.last_added = None;
        Ok(())
    }

    /// DPB 占满时输出
    fn bump(&mut self) -> HwdecResult<()> {
        while let Some(id) = self.dpb.get_next_out_picture(false) {
            self.output(id)?;
        }
        Ok(())
    }

    /// 输出全部等待中的图像
    fn drain(&mut self) -> HwdecResult<()> {
        while let Some(id) = self.dpb.get_next_out_picture(true) {
            self.output(id)?;
        }
        Ok(())
    }

    fn output(&mut self, id: PictureId) -> HwdecResult<()> {
        let result = match self.dpb.picture(id) {
            Some(pic) => self.backend.present(pic),
            None => return Ok(()),
        };
        self.dpb.set_output_picture(id)?;
        self.stats.pictures_output += 1;
        result
    }
}
