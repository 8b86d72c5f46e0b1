//! H.264 切片头 (7.3.3) 解析.
//!
//! 切片头的语法依赖于它引用的 SPS 与 PPS, 调用方需要先通过
//! [`slice_pps_id`] 取出 PPS id 并查表, 再调用 [`parse_slice_header`].

use hwdec_core::{BitReader, HwdecError, HwdecResult};

use super::nal::NalUnitType;
use super::pps::{Pps, ceil_log2};
use super::sps::{Sps, check_range};

/// 单个切片头内 MMCO 命令数量上限
const MAX_MMCO_OPS: usize = 66;
/// 单个参考列表修改命令数量上限
const MAX_LIST_MODIFICATIONS: usize = 33;

/// 切片类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    P,
    B,
    I,
    Sp,
    Si,
}

impl SliceType {
    /// 由 slice_type 语法值 (0-9) 转换
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw % 5 {
            0 if raw < 10 => Some(Self::P),
            1 if raw < 10 => Some(Self::B),
            2 if raw < 10 => Some(Self::I),
            3 if raw < 10 => Some(Self::Sp),
            4 if raw < 10 => Some(Self::Si),
            _ => None,
        }
    }

    /// 是否为帧内切片 (I/SI)
    pub fn is_intra(self) -> bool {
        matches!(self, Self::I | Self::Si)
    }

    /// 是否使用 L0 参考列表 (P/SP/B)
    pub fn uses_list0(self) -> bool {
        matches!(self, Self::P | Self::Sp | Self::B)
    }

    pub fn is_b(self) -> bool {
        self == Self::B
    }
}

impl std::fmt::Display for SliceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::P => "P",
            Self::B => "B",
            Self::I => "I",
            Self::Sp => "SP",
            Self::Si => "SI",
        };
        write!(f, "{name}")
    }
}

/// 参考列表修改命令 (modification_of_pic_nums_idc)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefPicListModification {
    /// idc=0: picNumPred 减去 abs_diff_pic_num_minus1 + 1
    ShortTermSubtract { abs_diff_pic_num_minus1: u32 },
    /// idc=1: picNumPred 加上 abs_diff_pic_num_minus1 + 1
    ShortTermAdd { abs_diff_pic_num_minus1: u32 },
    /// idc=2: 长期参考
    LongTerm { long_term_pic_num: u32 },
}

/// 单个参考索引的加权预测参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WeightEntry {
    /// (weight, offset)
    pub luma: Option<(i32, i32)>,
    /// Cb/Cr 的 (weight, offset)
    pub chroma: Option<[(i32, i32); 2]>,
}

/// 加权预测表
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PredWeightTable {
    pub luma_log2_weight_denom: u32,
    pub chroma_log2_weight_denom: u32,
    pub l0: Vec<WeightEntry>,
    pub l1: Vec<WeightEntry>,
}

/// 内存管理控制操作 (MMCO)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryManagementOp {
    /// 1: 短期参考标记为不参考
    UnmarkShortTerm { difference_of_pic_nums_minus1: u32 },
    /// 2: 长期参考标记为不参考
    UnmarkLongTerm { long_term_pic_num: u32 },
    /// 3: 短期参考转为长期参考
    ShortTermToLongTerm {
        difference_of_pic_nums_minus1: u32,
        long_term_frame_idx: u32,
    },
    /// 4: 设置 MaxLongTermFrameIdx
    TrimLongTerm { max_long_term_frame_idx_plus1: u32 },
    /// 5: 所有参考标记为不参考
    UnmarkAll,
    /// 6: 当前图像标记为长期参考
    MarkCurrentLongTerm { long_term_frame_idx: u32 },
}

/// dec_ref_pic_marking() 语法
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecRefPicMarking {
    Idr {
        no_output_of_prior_pics_flag: bool,
        long_term_reference_flag: bool,
    },
    SlidingWindow,
    Adaptive(Vec<MemoryManagementOp>),
}

/// 切片头解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_mb_in_slice: u32,
    pub slice_type: SliceType,
    pub pic_parameter_set_id: u32,
    pub colour_plane_id: u8,
    pub frame_num: u32,
    pub field_pic_flag: bool,
    pub bottom_field_flag: bool,
    pub idr_pic_id: u32,
    pub pic_order_cnt_lsb: u32,
    pub delta_pic_order_cnt_bottom: i32,
    pub delta_pic_order_cnt: [i32; 2],
    pub redundant_pic_cnt: u32,
    pub direct_spatial_mv_pred_flag: bool,
    pub num_ref_idx_active_override_flag: bool,
    pub num_ref_idx_l0_active: u32,
    pub num_ref_idx_l1_active: u32,
    pub ref_pic_list_modification_l0: Vec<RefPicListModification>,
    pub ref_pic_list_modification_l1: Vec<RefPicListModification>,
    pub pred_weight_table: Option<PredWeightTable>,
    /// 仅 nal_ref_idc != 0 时存在
    pub dec_ref_pic_marking: Option<DecRefPicMarking>,
    pub cabac_init_idc: u32,
    pub slice_qp_delta: i32,
    pub sp_for_switch_flag: bool,
    pub slice_qs_delta: i32,
    pub disable_deblocking_filter_idc: u32,
    pub slice_alpha_c0_offset_div2: i32,
    pub slice_beta_offset_div2: i32,
    pub slice_group_change_cycle: u32,
    /// 切片头占用的位数 (RBSP 内)
    pub header_bit_size: usize,
}

impl SliceHeader {
    /// 是否包含 MMCO 5
    pub fn has_mmco5(&self) -> bool {
        matches!(
            &self.dec_ref_pic_marking,
            Some(DecRefPicMarking::Adaptive(ops)) if ops.contains(&MemoryManagementOp::UnmarkAll)
        )
    }

    /// IDR 切片的 no_output_of_prior_pics_flag
    pub fn no_output_of_prior_pics(&self) -> bool {
        matches!(
            self.dec_ref_pic_marking,
            Some(DecRefPicMarking::Idr {
                no_output_of_prior_pics_flag: true,
                ..
            })
        )
    }
}

/// 只读取切片头开头的 PPS id (first_mb_in_slice, slice_type 之后)
pub fn slice_pps_id(rbsp: &[u8]) -> HwdecResult<u32> {
    let mut br = BitReader::new(rbsp);
    br.read_ue();
    br.read_ue();
    let pps_id = br.read_ue();
    if br.is_overrun() {
        return Err(HwdecError::MalformedSyntax("H264: 切片头截断".into()));
    }
    check_range("pic_parameter_set_id", pps_id, super::pps::MAX_PPS_ID)?;
    Ok(pps_id)
}

/// 解析切片头
pub fn parse_slice_header(
    rbsp: &[u8],
    nal_unit_type: NalUnitType,
    nal_ref_idc: u8,
    sps: &Sps,
    pps: &Pps,
) -> HwdecResult<SliceHeader> {
    let mut br = BitReader::new(rbsp);
    let idr = nal_unit_type.is_idr();

    let first_mb_in_slice = br.read_ue();
    let pic_size_in_mbs = sps.pic_width_in_mbs * sps.frame_height_in_mbs();
    if first_mb_in_slice >= pic_size_in_mbs {
        return Err(HwdecError::MalformedSyntax(format!(
            "H264: first_mb_in_slice 超出范围, value={first_mb_in_slice}, mbs={pic_size_in_mbs}"
        )));
    }

    let raw_slice_type = br.read_ue();
    let slice_type = SliceType::from_raw(raw_slice_type).ok_or_else(|| {
        HwdecError::MalformedSyntax(format!("H264: slice_type 非法, value={raw_slice_type}"))
    })?;
    if idr && !slice_type.is_intra() {
        return Err(HwdecError::MalformedSyntax(format!(
            "H264: IDR 切片类型非法, slice_type={slice_type}"
        )));
    }

    let pic_parameter_set_id = br.read_ue();
    if pic_parameter_set_id != pps.pps_id {
        return Err(HwdecError::InvalidArgument(format!(
            "H264: 切片引用 PPS {} 与传入 PPS {} 不一致",
            pic_parameter_set_id, pps.pps_id
        )));
    }

    let colour_plane_id = if sps.separate_colour_plane_flag {
        br.read_bits(2) as u8
    } else {
        0
    };
    let frame_num = br.read_bits(sps.log2_max_frame_num);

    let mut field_pic_flag = false;
    let mut bottom_field_flag = false;
    if !sps.frame_mbs_only_flag {
        field_pic_flag = br.read_flag();
        if field_pic_flag {
            bottom_field_flag = br.read_flag();
        }
    }

    let idr_pic_id = if idr { br.read_ue() } else { 0 };
    check_range("idr_pic_id", idr_pic_id, 65_535)?;

    let mut pic_order_cnt_lsb = 0;
    let mut delta_pic_order_cnt_bottom = 0;
    let mut delta_pic_order_cnt = [0; 2];
    match sps.pic_order_cnt_type {
        0 => {
            pic_order_cnt_lsb = br.read_bits(sps.log2_max_pic_order_cnt_lsb);
            if pps.bottom_field_pic_order_in_frame_present_flag && !field_pic_flag {
                delta_pic_order_cnt_bottom = br.read_se();
            }
        }
        1 if !sps.delta_pic_order_always_zero_flag => {
            delta_pic_order_cnt[0] = br.read_se();
            if pps.bottom_field_pic_order_in_frame_present_flag && !field_pic_flag {
                delta_pic_order_cnt[1] = br.read_se();
            }
        }
        _ => {}
    }

    let redundant_pic_cnt = if pps.redundant_pic_cnt_present_flag {
        br.read_ue()
    } else {
        0
    };
    check_range("redundant_pic_cnt", redundant_pic_cnt, 127)?;

    let direct_spatial_mv_pred_flag = slice_type.is_b() && br.read_flag();

    let mut num_ref_idx_active_override_flag = false;
    let mut num_ref_idx_l0_active = 0;
    let mut num_ref_idx_l1_active = 0;
    if slice_type.uses_list0() {
        num_ref_idx_l0_active = pps.num_ref_idx_l0_default_active;
        if slice_type.is_b() {
            num_ref_idx_l1_active = pps.num_ref_idx_l1_default_active;
        }
        num_ref_idx_active_override_flag = br.read_flag();
        if num_ref_idx_active_override_flag {
            num_ref_idx_l0_active = br.read_ue().saturating_add(1);
            if slice_type.is_b() {
                num_ref_idx_l1_active = br.read_ue().saturating_add(1);
            }
        }
        let max_refs = if field_pic_flag { 32 } else { 16 };
        check_range("num_ref_idx_l0_active", num_ref_idx_l0_active, max_refs)?;
        check_range("num_ref_idx_l1_active", num_ref_idx_l1_active, max_refs)?;
    }

    let mut ref_pic_list_modification_l0 = Vec::new();
    let mut ref_pic_list_modification_l1 = Vec::new();
    if !slice_type.is_intra() {
        if br.read_flag() {
            ref_pic_list_modification_l0 = parse_ref_pic_list_modification(&mut br)?;
        }
        if slice_type.is_b() && br.read_flag() {
            ref_pic_list_modification_l1 = parse_ref_pic_list_modification(&mut br)?;
        }
    }

    let weighted = (pps.weighted_pred_flag && matches!(slice_type, SliceType::P | SliceType::Sp))
        || (pps.weighted_bipred_idc == 1 && slice_type.is_b());
    let pred_weight_table = if weighted {
        Some(parse_pred_weight_table(
            &mut br,
            sps.chroma_array_type(),
            slice_type,
            num_ref_idx_l0_active,
            num_ref_idx_l1_active,
        )?)
    } else {
        None
    };

    let dec_ref_pic_marking = if nal_ref_idc != 0 {
        Some(parse_dec_ref_pic_marking(&mut br, idr)?)
    } else {
        None
    };

    let cabac_init_idc = if pps.entropy_coding_mode_flag && !slice_type.is_intra() {
        br.read_ue()
    } else {
        0
    };
    check_range("cabac_init_idc", cabac_init_idc, 2)?;

    let slice_qp_delta = br.read_se();

    let mut sp_for_switch_flag = false;
    let mut slice_qs_delta = 0;
    if matches!(slice_type, SliceType::Sp | SliceType::Si) {
        if slice_type == SliceType::Sp {
            sp_for_switch_flag = br.read_flag();
        }
        slice_qs_delta = br.read_se();
    }

    let mut disable_deblocking_filter_idc = 0;
    let mut slice_alpha_c0_offset_div2 = 0;
    let mut slice_beta_offset_div2 = 0;
    if pps.deblocking_filter_control_present_flag {
        disable_deblocking_filter_idc = br.read_ue();
        check_range("disable_deblocking_filter_idc", disable_deblocking_filter_idc, 2)?;
        if disable_deblocking_filter_idc != 1 {
            slice_alpha_c0_offset_div2 = br.read_se();
            slice_beta_offset_div2 = br.read_se();
        }
    }

    let mut slice_group_change_cycle = 0;
    if let Some(rate) = pps.slice_group_change_rate() {
        let pic_size_in_map_units = sps.pic_width_in_mbs * sps.pic_height_in_map_units;
        let bits = ceil_log2(pic_size_in_map_units.div_ceil(rate) + 1);
        slice_group_change_cycle = br.read_bits(bits);
    }

    if br.is_overrun() {
        return Err(HwdecError::MalformedSyntax(format!(
            "H264: 切片头截断, frame_num={}, bits={}",
            frame_num,
            br.bits_read()
        )));
    }

    Ok(SliceHeader {
        first_mb_in_slice,
        slice_type,
        pic_parameter_set_id,
        colour_plane_id,
        frame_num,
        field_pic_flag,
        bottom_field_flag,
        idr_pic_id,
        pic_order_cnt_lsb,
        delta_pic_order_cnt_bottom,
        delta_pic_order_cnt,
        redundant_pic_cnt,
        direct_spatial_mv_pred_flag,
        num_ref_idx_active_override_flag,
        num_ref_idx_l0_active,
        num_ref_idx_l1_active,
        ref_pic_list_modification_l0,
        ref_pic_list_modification_l1,
        pred_weight_table,
        dec_ref_pic_marking,
        cabac_init_idc,
        slice_qp_delta,
        sp_for_switch_flag,
        slice_qs_delta,
        disable_deblocking_filter_idc,
        slice_alpha_c0_offset_div2,
        slice_beta_offset_div2,
        slice_group_change_cycle,
        header_bit_size: br.bits_read(),
    })
}

fn parse_ref_pic_list_modification(br: &mut BitReader) -> HwdecResult<Vec<RefPicListModification>> {
    let mut mods = Vec::new();
    loop {
        let idc = br.read_ue();
        let modification = match idc {
            0 => RefPicListModification::ShortTermSubtract {
                abs_diff_pic_num_minus1: br.read_ue(),
            },
            1 => RefPicListModification::ShortTermAdd {
                abs_diff_pic_num_minus1: br.read_ue(),
            },
            2 => RefPicListModification::LongTerm {
                long_term_pic_num: br.read_ue(),
            },
            3 => return Ok(mods),
            _ => {
                return Err(HwdecError::MalformedSyntax(format!(
                    "H264: modification_of_pic_nums_idc 非法, value={idc}"
                )));
            }
        };
        if mods.len() >= MAX_LIST_MODIFICATIONS || br.is_overrun() {
            return Err(HwdecError::MalformedSyntax(
                "H264: 参考列表修改命令过多或截断".into(),
            ));
        }
        mods.push(modification);
    }
}

fn parse_weight_entries(
    br: &mut BitReader,
    count: u32,
    chroma_array_type: u32,
) -> HwdecResult<Vec<WeightEntry>> {
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut entry = WeightEntry::default();
        if br.read_flag() {
            entry.luma = Some((br.read_se(), br.read_se()));
        }
        if chroma_array_type != 0 && br.read_flag() {
            entry.chroma = Some([(br.read_se(), br.read_se()), (br.read_se(), br.read_se())]);
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn parse_pred_weight_table(
    br: &mut BitReader,
    chroma_array_type: u32,
    slice_type: SliceType,
    num_ref_idx_l0_active: u32,
    num_ref_idx_l1_active: u32,
) -> HwdecResult<PredWeightTable> {
    let luma_log2_weight_denom = br.read_ue();
    check_range("luma_log2_weight_denom", luma_log2_weight_denom, 7)?;
    let chroma_log2_weight_denom = if chroma_array_type != 0 {
        br.read_ue()
    } else {
        0
    };
    check_range("chroma_log2_weight_denom", chroma_log2_weight_denom, 7)?;

    let l0 = parse_weight_entries(br, num_ref_idx_l0_active, chroma_array_type)?;
    let l1 = if slice_type.is_b() {
        parse_weight_entries(br, num_ref_idx_l1_active, chroma_array_type)?
    } else {
        Vec::new()
    };

    Ok(PredWeightTable {
        luma_log2_weight_denom,
        chroma_log2_weight_denom,
        l0,
        l1,
    })
}

fn parse_dec_ref_pic_marking(br: &mut BitReader, idr: bool) -> HwdecResult<DecRefPicMarking> {
    if idr {
        return Ok(DecRefPicMarking::Idr {
            no_output_of_prior_pics_flag: br.read_flag(),
            long_term_reference_flag: br.read_flag(),
        });
    }
    if !br.read_flag() {
        return Ok(DecRefPicMarking::SlidingWindow);
    }

    let mut ops = Vec::new();
    loop {
        let mmco = br.read_ue();
        let op = match mmco {
            0 => break,
            1 => MemoryManagementOp::UnmarkShortTerm {
                difference_of_pic_nums_minus1: br.read_ue(),
            },
            2 => MemoryManagementOp::UnmarkLongTerm {
                long_term_pic_num: br.read_ue(),
            },
            3 => MemoryManagementOp::ShortTermToLongTerm {
                difference_of_pic_nums_minus1: br.read_ue(),
                long_term_frame_idx: br.read_ue(),
            },
            4 => MemoryManagementOp::TrimLongTerm {
                max_long_term_frame_idx_plus1: br.read_ue(),
            },
            5 => MemoryManagementOp::UnmarkAll,
            6 => MemoryManagementOp::MarkCurrentLongTerm {
                long_term_frame_idx: br.read_ue(),
            },
            _ => {
                return Err(HwdecError::MalformedSyntax(format!(
                    "H264: memory_management_control_operation 非法, value={mmco}"
                )));
            }
        };
        if ops.len() >= MAX_MMCO_OPS || br.is_overrun() {
            return Err(HwdecError::MalformedSyntax(format!(
                "H264: MMCO 命令过多或截断, max={MAX_MMCO_OPS}"
            )));
        }
        ops.push(op);
    }
    Ok(DecRefPicMarking::Adaptive(ops))
}
