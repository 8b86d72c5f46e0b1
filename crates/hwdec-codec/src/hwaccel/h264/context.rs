//! NAL 解析上下文与访问单元边界检测.
//!
//! [`NalParser`] 持有 SPS/PPS 表和两个 [`NalContext`] 槽位 (当前/上一个),
//! 对每个切片执行 7.4.1.2.4 中首个 VCL NAL 的判定规则子集,
//! 决定它属于当前访问单元还是开始一个新的访问单元.

use std::sync::Arc;

use hwdec_core::{BitReader, HwdecError, HwdecResult, ParamSetKind};
use log::{debug, warn};

use crate::parsers::h264::pps::MAX_PPS_ID;
use crate::parsers::h264::sps::MAX_SPS_ID;
use crate::parsers::h264::{
    NalUnit, NalUnitType, Pps, SliceHeader, Sps, parse_pps, parse_slice_header, parse_sps,
    slice_pps_id,
};

/// 单个切片的解析上下文
#[derive(Debug, Clone)]
pub struct NalContext {
    pub nal_ref_idc: u8,
    pub nal_unit_type: NalUnitType,
    pub sps: Option<Arc<Sps>>,
    pub pps: Option<Arc<Pps>>,
    pub slice: Option<SliceHeader>,
}

impl Default for NalContext {
    fn default() -> Self {
        Self {
            nal_ref_idc: 0,
            nal_unit_type: NalUnitType::Unknown(0),
            sps: None,
            pps: None,
            slice: None,
        }
    }
}

impl NalContext {
    pub fn is_idr(&self) -> bool {
        self.nal_unit_type.is_idr()
    }

    /// 参数集与切片头都已就绪时返回三者
    pub fn parts(&self) -> Option<(&Arc<Sps>, &Arc<Pps>, &SliceHeader)> {
        Some((self.sps.as_ref()?, self.pps.as_ref()?, self.slice.as_ref()?))
    }

    /// `next` 是否开始一个新的访问单元
    fn starts_new_access_unit(&self, next: &NalContext) -> bool {
        let (Some(prev), Some(cur)) = (self.slice.as_ref(), next.slice.as_ref()) else {
            return true;
        };

        if prev.frame_num != cur.frame_num
            || prev.pic_parameter_set_id != cur.pic_parameter_set_id
            || prev.field_pic_flag != cur.field_pic_flag
        {
            return true;
        }
        if prev.field_pic_flag
            && cur.field_pic_flag
            && prev.bottom_field_flag != cur.bottom_field_flag
        {
            return true;
        }
        if (self.nal_ref_idc == 0) != (next.nal_ref_idc == 0) {
            return true;
        }

        let poc_type = next.sps.as_ref().map_or(0, |sps| sps.pic_order_cnt_type);
        match poc_type {
            0 => {
                if prev.pic_order_cnt_lsb != cur.pic_order_cnt_lsb
                    || prev.delta_pic_order_cnt_bottom != cur.delta_pic_order_cnt_bottom
                {
                    return true;
                }
            }
            1 => {
                if prev.delta_pic_order_cnt != cur.delta_pic_order_cnt {
                    return true;
                }
            }
            _ => {}
        }

        if self.is_idr() != next.is_idr() {
            return true;
        }
        next.is_idr() && prev.idr_pic_id != cur.idr_pic_id
    }
}

/// 切片与当前访问单元的关系
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalOutcome {
    /// 切片开始一个新的访问单元, 之前累积的编码图像应当提交
    NewAccessUnit,
    /// 切片属于当前访问单元
    SliceContinues,
}

/// 单个 NAL 的解析结果
#[derive(Debug, Clone)]
pub enum ParsedNal {
    Sps(Arc<Sps>),
    Pps(Arc<Pps>),
    Slice(NalOutcome),
    EndOfSequence,
    EndOfStream,
    /// 不影响解码状态的 NAL (AUD, SEI, 填充数据等)
    Other(NalUnitType),
}

/// H.264 NAL 解析器
///
/// 参数集按 id 保存为 `Arc`, 同 id 的新参数集整体替换旧值,
/// 已被切片上下文引用的旧参数集保持有效直到上下文被替换.
#[derive(Debug)]
pub struct NalParser {
    sps_table: Vec<Option<Arc<Sps>>>,
    pps_table: Vec<Option<Arc<Pps>>>,
    slots: [NalContext; 2],
    current: usize,
    slice_count: u32,
}

impl Default for NalParser {
    fn default() -> Self {
        Self::new()
    }
}

impl NalParser {
    pub fn new() -> Self {
        Self {
            sps_table: vec![None; MAX_SPS_ID as usize + 1],
            pps_table: vec![None; MAX_PPS_ID as usize + 1],
            slots: [NalContext::default(), NalContext::default()],
            current: 0,
            slice_count: 0,
        }
    }

    /// 当前访问单元第一个切片的上下文
    pub fn current(&self) -> &NalContext {
        &self.slots[self.current]
    }

    /// 上一个槽位: 边界之后为上一访问单元的首个切片
    pub fn last(&self) -> &NalContext {
        &self.slots[1 - self.current]
    }

    /// 当前访问单元已接收的切片数
    pub fn slice_count(&self) -> u32 {
        self.slice_count
    }

    pub fn sps(&self, id: u32) -> Option<&Arc<Sps>> {
        self.sps_table.get(id as usize)?.as_ref()
    }

    pub fn pps(&self, id: u32) -> Option<&Arc<Pps>> {
        self.pps_table.get(id as usize)?.as_ref()
    }

    /// 清空槽位, 下一个切片必然开始新的访问单元; 参数集保留
    pub fn reset(&mut self) {
        self.slots = [NalContext::default(), NalContext::default()];
        self.current = 0;
        self.slice_count = 0;
    }

    /// 丢弃全部参数集
    pub fn clear_parameter_sets(&mut self) {
        self.sps_table.iter_mut().for_each(|entry| *entry = None);
        self.pps_table.iter_mut().for_each(|entry| *entry = None);
    }

    /// 解析一个 NAL 单元
    pub fn parse_nal(&mut self, nal: &NalUnit) -> HwdecResult<ParsedNal> {
        match nal.nal_type {
            NalUnitType::Sps => {
                let sps = Arc::new(parse_sps(&nal.rbsp()?)?);
                debug!(
                    "H264: SPS id={}, profile={}, {}x{}, poc_type={}, num_ref_frames={}",
                    sps.sps_id,
                    sps.profile_idc,
                    sps.width,
                    sps.height,
                    sps.pic_order_cnt_type,
                    sps.max_num_ref_frames
                );
                self.sps_table[sps.sps_id as usize] = Some(Arc::clone(&sps));
                Ok(ParsedNal::Sps(sps))
            }
            NalUnitType::Pps => {
                let rbsp = nal.rbsp()?;
                let sps = self.sps(pps_sps_id(&rbsp)).map(Arc::clone);
                let pps = Arc::new(parse_pps(&rbsp, sps.as_deref())?);
                debug!(
                    "H264: PPS id={}, sps_id={}, cabac={}, transform_8x8={}",
                    pps.pps_id,
                    pps.sps_id,
                    pps.entropy_coding_mode_flag,
                    pps.transform_8x8_mode_flag
                );
                self.pps_table[pps.pps_id as usize] = Some(Arc::clone(&pps));
                Ok(ParsedNal::Pps(pps))
            }
            kind if kind.has_slice_header() => self.parse_slice(nal).map(ParsedNal::Slice),
            NalUnitType::EndOfSequence => Ok(ParsedNal::EndOfSequence),
            NalUnitType::EndOfStream => Ok(ParsedNal::EndOfStream),
            other => Ok(ParsedNal::Other(other)),
        }
    }

    fn parse_slice(&mut self, nal: &NalUnit) -> HwdecResult<NalOutcome> {
        let rbsp = nal.rbsp()?;
        let pps_id = slice_pps_id(&rbsp)?;
        let previous = &self.slots[self.current];

        // 表中缺失时沿用上一个上下文中 id 相同的参数集
        let pps = match self.pps(pps_id) {
            Some(pps) => Arc::clone(pps),
            None => previous
                .pps
                .as_ref()
                .filter(|pps| pps.pps_id == pps_id)
                .map(Arc::clone)
                .ok_or(HwdecError::MissingParameterSet {
                    kind: ParamSetKind::Pps,
                    id: pps_id,
                })?,
        };
        let sps = match self.sps(pps.sps_id) {
            Some(sps) => Arc::clone(sps),
            None => previous
                .sps
                .as_ref()
                .filter(|sps| sps.sps_id == pps.sps_id)
                .map(Arc::clone)
                .ok_or(HwdecError::MissingParameterSet {
                    kind: ParamSetKind::Sps,
                    id: pps.sps_id,
                })?,
        };

        let slice = parse_slice_header(&rbsp, nal.nal_type, nal.ref_idc, &sps, &pps)?;
        let next = NalContext {
            nal_ref_idc: nal.ref_idc,
            nal_unit_type: nal.nal_type,
            sps: Some(sps),
            pps: Some(pps),
            slice: Some(slice),
        };

        let scratch = 1 - self.current;
        if self.slots[self.current].starts_new_access_unit(&next) {
            self.slots[scratch] = next;
            self.current = scratch;
            self.slice_count = 1;
            Ok(NalOutcome::NewAccessUnit)
        } else {
            self.slots[scratch] = next;
            self.slice_count += 1;
            Ok(NalOutcome::SliceContinues)
        }
    }
}

/// 读取 PPS 引用的 SPS id
fn pps_sps_id(rbsp: &[u8]) -> u32 {
    let mut br = BitReader::new(rbsp);
    br.read_ue();
    let sps_id = br.read_ue();
    if br.is_overrun() {
        warn!("H264: PPS 截断, 无法读取 seq_parameter_set_id");
    }
    sps_id
}
