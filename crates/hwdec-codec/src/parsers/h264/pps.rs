//! H.264 PPS (Picture Parameter Set) 解析.

use hwdec_core::{BitReader, HwdecError, HwdecResult};

use super::scaling::{Fallback, ScalingMatrix, parse_scaling_matrix};
use super::sps::{MAX_SPS_ID, Sps, check_range};

/// PPS id 上限 (含)
pub const MAX_PPS_ID: u32 = 255;

/// 切片组映射 (FMO)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceGroupMap {
    /// 类型 0: 交错
    Interleaved { run_length_minus1: Vec<u32> },
    /// 类型 1: 分散
    Dispersed,
    /// 类型 2: 前景与剩余区域
    Foreground {
        top_left: Vec<u32>,
        bottom_right: Vec<u32>,
    },
    /// 类型 3-5: 盒状/光栅/擦除演进
    Evolving {
        map_type: u32,
        change_direction_flag: bool,
        change_rate_minus1: u32,
    },
    /// 类型 6: 显式分配
    Explicit { slice_group_id: Vec<u32> },
}

/// PPS 解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct Pps {
    pub pps_id: u32,
    pub sps_id: u32,
    /// false=CAVLC, true=CABAC
    pub entropy_coding_mode_flag: bool,
    /// bottom_field_pic_order_in_frame_present_flag (旧称 pic_order_present_flag)
    pub bottom_field_pic_order_in_frame_present_flag: bool,
    pub num_slice_groups: u32,
    pub slice_group_map: Option<SliceGroupMap>,
    pub num_ref_idx_l0_default_active: u32,
    pub num_ref_idx_l1_default_active: u32,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_idc: u32,
    pub pic_init_qp_minus26: i32,
    pub pic_init_qs_minus26: i32,
    pub chroma_qp_index_offset: i32,
    pub deblocking_filter_control_present_flag: bool,
    pub constrained_intra_pred_flag: bool,
    pub redundant_pic_cnt_present_flag: bool,
    pub transform_8x8_mode_flag: bool,
    /// pic_scaling_matrix_present_flag 为 1 时的矩阵 (已应用回退规则)
    pub scaling_matrix: Option<ScalingMatrix>,
    /// 未携带扩展字段时等于 chroma_qp_index_offset
    pub second_chroma_qp_index_offset: i32,
}

impl Pps {
    /// SliceGroupChangeRate
    pub fn slice_group_change_rate(&self) -> Option<u32> {
        match &self.slice_group_map {
            Some(SliceGroupMap::Evolving {
                change_rate_minus1, ..
            }) => Some(change_rate_minus1 + 1),
            _ => None,
        }
    }

    /// 当前图像实际使用的量化矩阵
    ///
    /// PPS 携带矩阵时优先, 否则沿用序列级矩阵 (可能为 Flat_16).
    pub fn effective_scaling_matrix(&self, sps: &Sps) -> ScalingMatrix {
        match &self.scaling_matrix {
            Some(matrix) => matrix.clone(),
            None => sps.effective_scaling_matrix(),
        }
    }
}

/// 解析 PPS RBSP
///
/// `sps` 为 PPS 引用的序列参数集 (若已知), 决定 4:4:4 的 8x8 列表数量和缺省列表回退规则.
pub fn parse_pps(rbsp: &[u8], sps: Option<&Sps>) -> HwdecResult<Pps> {
    if rbsp.is_empty() {
        return Err(HwdecError::MalformedSyntax("H264: PPS RBSP 为空".into()));
    }

    let mut br = BitReader::new(rbsp);
    let pps_id = br.read_ue();
    check_range("pic_parameter_set_id", pps_id, MAX_PPS_ID)?;
    let sps_id = br.read_ue();
    check_range("seq_parameter_set_id", sps_id, MAX_SPS_ID)?;
    let sps = sps.filter(|sps| sps.sps_id == sps_id);

    let entropy_coding_mode_flag = br.read_flag();
    let bottom_field_pic_order_in_frame_present_flag = br.read_flag();

    let num_slice_groups_minus1 = br.read_ue();
    check_range("num_slice_groups_minus1", num_slice_groups_minus1, 7)?;
    let slice_group_map = if num_slice_groups_minus1 > 0 {
        Some(parse_slice_group_map(&mut br, num_slice_groups_minus1)?)
    } else {
        None
    };

    let l0_minus1 = br.read_ue();
    check_range("num_ref_idx_l0_default_active_minus1", l0_minus1, 31)?;
    let l1_minus1 = br.read_ue();
    check_range("num_ref_idx_l1_default_active_minus1", l1_minus1, 31)?;

    let weighted_pred_flag = br.read_flag();
    let weighted_bipred_idc = br.read_bits(2);
    check_range("weighted_bipred_idc", weighted_bipred_idc, 2)?;

    let pic_init_qp_minus26 = br.read_se();
    check_signed("pic_init_qp_minus26", pic_init_qp_minus26, -26, 25)?;
    let pic_init_qs_minus26 = br.read_se();
    check_signed("pic_init_qs_minus26", pic_init_qs_minus26, -26, 25)?;
    let chroma_qp_index_offset = br.read_se();
    check_signed("chroma_qp_index_offset", chroma_qp_index_offset, -12, 12)?;

    let deblocking_filter_control_present_flag = br.read_flag();
    let constrained_intra_pred_flag = br.read_flag();
    let redundant_pic_cnt_present_flag = br.read_flag();

    let mut transform_8x8_mode_flag = false;
    let mut scaling_matrix = None;
    let mut second_chroma_qp_index_offset = chroma_qp_index_offset;

    // 扩展字段没有存在标志, 只能通过 rbsp_trailing_bits 前瞻判断
    if !br.rbsp_trailing_bits() {
        transform_8x8_mode_flag = br.read_flag();
        if br.read_flag() {
            let chroma_format_idc = sps.map_or(1, |sps| sps.chroma_format_idc);
            let lists_8x8 = match (transform_8x8_mode_flag, chroma_format_idc) {
                (false, _) => 0,
                (true, 3) => 6,
                (true, _) => 2,
            };
            let seq_matrix = sps.and_then(|sps| sps.scaling_matrix.as_ref());
            let fallback = match seq_matrix {
                Some(seq) => Fallback::Sequence(seq),
                None => Fallback::Default,
            };
            scaling_matrix = Some(parse_scaling_matrix(&mut br, 6 + lists_8x8, fallback));
        }
        second_chroma_qp_index_offset = br.read_se();
        check_signed(
            "second_chroma_qp_index_offset",
            second_chroma_qp_index_offset,
            -12,
            12,
        )?;
    }

    if br.is_overrun() {
        return Err(HwdecError::MalformedSyntax(format!(
            "H264: PPS 数据截断, pps_id={pps_id}"
        )));
    }

    Ok(Pps {
        pps_id,
        sps_id,
        entropy_coding_mode_flag,
        bottom_field_pic_order_in_frame_present_flag,
        num_slice_groups: num_slice_groups_minus1 + 1,
        slice_group_map,
        num_ref_idx_l0_default_active: l0_minus1 + 1,
        num_ref_idx_l1_default_active: l1_minus1 + 1,
        weighted_pred_flag,
        weighted_bipred_idc,
        pic_init_qp_minus26,
        pic_init_qs_minus26,
        chroma_qp_index_offset,
        deblocking_filter_control_present_flag,
        constrained_intra_pred_flag,
        redundant_pic_cnt_present_flag,
        transform_8x8_mode_flag,
        scaling_matrix,
        second_chroma_qp_index_offset,
    })
}

fn check_signed(name: &str, value: i32, min: i32, max: i32) -> HwdecResult<()> {
    if !(min..=max).contains(&value) {
        return Err(HwdecError::MalformedSyntax(format!(
            "H264: {name} 超出范围, value={value}, range=[{min}, {max}]"
        )));
    }
    Ok(())
}

fn parse_slice_group_map(
    br: &mut BitReader,
    num_slice_groups_minus1: u32,
) -> HwdecResult<SliceGroupMap> {
    let map_type = br.read_ue();
    let map = match map_type {
        0 => SliceGroupMap::Interleaved {
            run_length_minus1: (0..=num_slice_groups_minus1).map(|_| br.read_ue()).collect(),
        },
        1 => SliceGroupMap::Dispersed,
        2 => {
            let mut top_left = Vec::new();
            let mut bottom_right = Vec::new();
            for _ in 0..num_slice_groups_minus1 {
                top_left.push(br.read_ue());
                bottom_right.push(br.read_ue());
            }
            SliceGroupMap::Foreground {
                top_left,
                bottom_right,
            }
        }
        3..=5 => SliceGroupMap::Evolving {
            map_type,
            change_direction_flag: br.read_flag(),
            change_rate_minus1: br.read_ue(),
        },
        6 => {
            let pic_size_in_map_units_minus1 = br.read_ue();
            // 上限为最大帧尺寸的宏块数
            check_range("pic_size_in_map_units_minus1", pic_size_in_map_units_minus1, 139_263)?;
            let bits = ceil_log2(num_slice_groups_minus1 + 1);
            SliceGroupMap::Explicit {
                slice_group_id: (0..=pic_size_in_map_units_minus1)
                    .map(|_| br.read_bits(bits))
                    .collect(),
            }
        }
        _ => {
            return Err(HwdecError::MalformedSyntax(format!(
                "H264: slice_group_map_type 非法, value={map_type}"
            )));
        }
    };
    Ok(map)
}

/// Ceil(Log2(value))
pub(crate) fn ceil_log2(value: u32) -> u32 {
    if value <= 1 {
        0
    } else {
        u32::BITS - (value - 1).leading_zeros()
    }
}
