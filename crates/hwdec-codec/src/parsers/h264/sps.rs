//! H.264 SPS (Sequence Parameter Set) 解析.
//!
//! 字段严格按 7.3.2.1 的语法顺序读取. Exp-Golomb 字段只有在顺序正确时才能自定界,
//! 因此不做任何跳读或惰性解析.

use hwdec_core::{BitReader, HwdecError, HwdecResult};
use log::warn;

use super::scaling::{Fallback, ScalingMatrix, parse_scaling_matrix};

/// SPS id 上限 (含)
pub const MAX_SPS_ID: u32 = 31;

/// 帧裁剪偏移 (以裁剪单位计)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCrop {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

/// HRD 中单个 CPB 的参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpbSpec {
    pub bit_rate_value_minus1: u32,
    pub cpb_size_value_minus1: u32,
    pub cbr_flag: bool,
}

/// HRD 参数 (E.1.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HrdParameters {
    pub bit_rate_scale: u8,
    pub cpb_size_scale: u8,
    pub cpbs: Vec<CpbSpec>,
    pub initial_cpb_removal_delay_length: u8,
    pub cpb_removal_delay_length: u8,
    pub dpb_output_delay_length: u8,
    pub time_offset_length: u8,
}

/// VUI 定时信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingInfo {
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub fixed_frame_rate_flag: bool,
}

impl TimingInfo {
    /// 帧率 (time_scale / (2 * num_units_in_tick))
    pub fn frame_rate(&self) -> Option<f64> {
        (self.num_units_in_tick > 0)
            .then(|| f64::from(self.time_scale) / (2.0 * f64::from(self.num_units_in_tick)))
    }
}

/// 码流限制信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitstreamRestriction {
    pub motion_vectors_over_pic_boundaries_flag: bool,
    pub max_bytes_per_pic_denom: u32,
    pub max_bits_per_mb_denom: u32,
    pub log2_max_mv_length_horizontal: u32,
    pub log2_max_mv_length_vertical: u32,
    pub max_num_reorder_frames: u32,
    pub max_dec_frame_buffering: u32,
}

/// 颜色描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColourDescription {
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
}

/// VUI 参数 (附录 E)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vui {
    pub aspect_ratio_idc: u8,
    /// 像素宽高比, 未指定时为 (0, 1)
    pub sar: (u32, u32),
    pub overscan_appropriate: Option<bool>,
    pub video_format: Option<u8>,
    pub video_full_range_flag: bool,
    pub colour_description: Option<ColourDescription>,
    /// (top, bottom)
    pub chroma_sample_loc: Option<(u32, u32)>,
    pub timing: Option<TimingInfo>,
    pub nal_hrd: Option<HrdParameters>,
    pub vcl_hrd: Option<HrdParameters>,
    pub low_delay_hrd_flag: bool,
    pub pic_struct_present_flag: bool,
    pub bitstream_restriction: Option<BitstreamRestriction>,
}

/// SPS 解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct Sps {
    /// profile_idc (66=Baseline, 77=Main, 100=High ...)
    pub profile_idc: u8,
    pub constraint_set_flags: u8,
    pub level_idc: u8,
    pub sps_id: u32,
    /// 0=单色, 1=4:2:0, 2=4:2:2, 3=4:4:4
    pub chroma_format_idc: u32,
    pub separate_colour_plane_flag: bool,
    pub bit_depth_luma: u32,
    pub bit_depth_chroma: u32,
    pub qpprime_y_zero_transform_bypass_flag: bool,
    /// seq_scaling_matrix_present_flag 为 1 时的矩阵 (已应用回退规则 A)
    pub scaling_matrix: Option<ScalingMatrix>,
    pub log2_max_frame_num: u32,
    pub pic_order_cnt_type: u32,
    /// 仅 POC 类型 0
    pub log2_max_pic_order_cnt_lsb: u32,
    /// 以下四项仅 POC 类型 1
    pub delta_pic_order_always_zero_flag: bool,
    pub offset_for_non_ref_pic: i32,
    pub offset_for_top_to_bottom_field: i32,
    pub offset_for_ref_frame: Vec<i32>,
    pub max_num_ref_frames: u32,
    pub gaps_in_frame_num_value_allowed_flag: bool,
    pub pic_width_in_mbs: u32,
    pub pic_height_in_map_units: u32,
    pub frame_mbs_only_flag: bool,
    pub mb_adaptive_frame_field_flag: bool,
    pub direct_8x8_inference_flag: bool,
    pub frame_crop: Option<FrameCrop>,
    /// 编码宽度 (像素, 宏块对齐)
    pub width: u32,
    /// 编码高度 (像素, 宏块对齐)
    pub height: u32,
    /// 裁剪后的显示宽度
    pub display_width: u32,
    /// 裁剪后的显示高度
    pub display_height: u32,
    pub vui: Option<Vui>,
}

impl Sps {
    /// MaxFrameNum
    pub fn max_frame_num(&self) -> u32 {
        1 << self.log2_max_frame_num
    }

    /// MaxPicOrderCntLsb
    pub fn max_pic_order_cnt_lsb(&self) -> u32 {
        1 << self.log2_max_pic_order_cnt_lsb
    }

    /// FrameHeightInMbs
    pub fn frame_height_in_mbs(&self) -> u32 {
        let factor = if self.frame_mbs_only_flag { 1 } else { 2 };
        self.pic_height_in_map_units * factor
    }

    /// ChromaArrayType
    pub fn chroma_array_type(&self) -> u32 {
        if self.separate_colour_plane_flag {
            0
        } else {
            self.chroma_format_idc
        }
    }

    /// 序列级量化矩阵, 未携带时为 Flat_16
    pub fn effective_scaling_matrix(&self) -> ScalingMatrix {
        self.scaling_matrix.clone().unwrap_or_else(ScalingMatrix::flat)
    }

    /// VUI 中的 max_dec_frame_buffering
    pub fn max_dec_frame_buffering(&self) -> Option<u32> {
        self.vui
            .as_ref()
            .and_then(|vui| vui.bitstream_restriction)
            .map(|restriction| restriction.max_dec_frame_buffering)
    }
}

/// 预定义的 SAR 表 (表 E-1)
const SAR_TABLE: [(u32, u32); 17] = [
    (0, 1),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

const EXTENDED_SAR: u8 = 255;

const MAX_DEC_FRAME_BUFFERING: u32 = 16;

/// 解析 SPS RBSP (不含 NAL 头部)
pub fn parse_sps(rbsp: &[u8]) -> HwdecResult<Sps> {
    if rbsp.len() < 4 {
        return Err(HwdecError::MalformedSyntax("H264: SPS RBSP 太短".into()));
    }

    let mut br = BitReader::new(rbsp);

    let profile_idc = br.read_bits(8) as u8;
    let constraint_set_flags = br.read_bits(8) as u8;
    let level_idc = br.read_bits(8) as u8;
    let sps_id = br.read_ue();
    check_range("seq_parameter_set_id", sps_id, MAX_SPS_ID)?;

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane_flag = false;
    let mut bit_depth_luma = 8;
    let mut bit_depth_chroma = 8;
    let mut qpprime_y_zero_transform_bypass_flag = false;
    let mut scaling_matrix = None;

    if has_chroma_info(profile_idc) {
        chroma_format_idc = br.read_ue();
        check_range("chroma_format_idc", chroma_format_idc, 3)?;
        if chroma_format_idc == 3 {
            separate_colour_plane_flag = br.read_flag();
        }
        let luma_minus8 = br.read_ue();
        check_range("bit_depth_luma_minus8", luma_minus8, 6)?;
        let chroma_minus8 = br.read_ue();
        check_range("bit_depth_chroma_minus8", chroma_minus8, 6)?;
        bit_depth_luma = luma_minus8 + 8;
        bit_depth_chroma = chroma_minus8 + 8;
        qpprime_y_zero_transform_bypass_flag = br.read_flag();

        if br.read_flag() {
            let list_count = if chroma_format_idc == 3 { 12 } else { 8 };
            scaling_matrix = Some(parse_scaling_matrix(&mut br, list_count, Fallback::Default));
        }
    }

    let log2_max_frame_num_minus4 = br.read_ue();
    check_range("log2_max_frame_num_minus4", log2_max_frame_num_minus4, 12)?;

    let pic_order_cnt_type = br.read_ue();
    check_range("pic_order_cnt_type", pic_order_cnt_type, 2)?;

    let mut log2_max_pic_order_cnt_lsb = 0;
    let mut delta_pic_order_always_zero_flag = false;
    let mut offset_for_non_ref_pic = 0;
    let mut offset_for_top_to_bottom_field = 0;
    let mut offset_for_ref_frame = Vec::new();
    match pic_order_cnt_type {
        0 => {
            let lsb_minus4 = br.read_ue();
            check_range("log2_max_pic_order_cnt_lsb_minus4", lsb_minus4, 12)?;
            log2_max_pic_order_cnt_lsb = lsb_minus4 + 4;
        }
        1 => {
            delta_pic_order_always_zero_flag = br.read_flag();
            offset_for_non_ref_pic = br.read_se();
            offset_for_top_to_bottom_field = br.read_se();
            let cycle_len = br.read_ue();
            check_range("num_ref_frames_in_pic_order_cnt_cycle", cycle_len, 255)?;
            offset_for_ref_frame = (0..cycle_len).map(|_| br.read_se()).collect();
        }
        _ => {}
    }

    let max_num_ref_frames = br.read_ue();
    check_range("max_num_ref_frames", max_num_ref_frames, 16)?;
    let gaps_in_frame_num_value_allowed_flag = br.read_flag();

    let width_minus1 = br.read_ue();
    let height_minus1 = br.read_ue();
    // 单边宏块数上限
    check_range("pic_width_in_mbs_minus1", width_minus1, 1055)?;
    check_range("pic_height_in_map_units_minus1", height_minus1, 1055)?;
    let pic_width_in_mbs = width_minus1 + 1;
    let pic_height_in_map_units = height_minus1 + 1;

    let frame_mbs_only_flag = br.read_flag();
    let mb_adaptive_frame_field_flag = !frame_mbs_only_flag && br.read_flag();
    let direct_8x8_inference_flag = br.read_flag();

    let frame_crop = if br.read_flag() {
        Some(FrameCrop {
            left: br.read_ue(),
            right: br.read_ue(),
            top: br.read_ue(),
            bottom: br.read_ue(),
        })
    } else {
        None
    };

    let width = pic_width_in_mbs * 16;
    let height = pic_height_in_map_units * if frame_mbs_only_flag { 16 } else { 32 };
    let chroma_array_type = if separate_colour_plane_flag { 0 } else { chroma_format_idc };
    let (display_width, display_height) = match frame_crop {
        Some(crop) => apply_crop(width, height, crop, chroma_array_type, frame_mbs_only_flag)?,
        None => (width, height),
    };

    if br.is_overrun() {
        return Err(HwdecError::MalformedSyntax(format!(
            "H264: SPS 数据截断, sps_id={}, bits={}",
            sps_id,
            br.bits_read()
        )));
    }

    // VUI 不影响解码, 出错时丢弃 VUI 并保留 SPS
    let vui = if br.read_flag() {
        match parse_vui(&mut br) {
            Ok(vui) if !br.is_overrun() => Some(vui),
            Ok(_) => {
                warn!("H264: VUI 数据截断, 忽略 VUI, sps_id={}, bits={}", sps_id, br.bits_read());
                None
            }
            Err(err) => {
                warn!("H264: 忽略非法 VUI, sps_id={sps_id}, {err}");
                None
            }
        }
    } else {
        None
    };

    Ok(Sps {
        profile_idc,
        constraint_set_flags,
        level_idc,
        sps_id,
        chroma_format_idc,
        separate_colour_plane_flag,
        bit_depth_luma,
        bit_depth_chroma,
        qpprime_y_zero_transform_bypass_flag,
        scaling_matrix,
        log2_max_frame_num: log2_max_frame_num_minus4 + 4,
        pic_order_cnt_type,
        log2_max_pic_order_cnt_lsb,
        delta_pic_order_always_zero_flag,
        offset_for_non_ref_pic,
        offset_for_top_to_bottom_field,
        offset_for_ref_frame,
        max_num_ref_frames,
        gaps_in_frame_num_value_allowed_flag,
        pic_width_in_mbs,
        pic_height_in_map_units,
        frame_mbs_only_flag,
        mb_adaptive_frame_field_flag,
        direct_8x8_inference_flag,
        frame_crop,
        width,
        height,
        display_width,
        display_height,
        vui,
    })
}

pub(crate) fn check_range(name: &str, value: u32, max: u32) -> HwdecResult<()> {
    if value > max {
        return Err(HwdecError::MalformedSyntax(format!(
            "H264: {name} 超出范围, value={value}, max={max}"
        )));
    }
    Ok(())
}

/// 携带 chroma_format_idc 等扩展字段的 profile
fn has_chroma_info(profile_idc: u8) -> bool {
    matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    )
}

fn apply_crop(
    width: u32,
    height: u32,
    crop: FrameCrop,
    chroma_array_type: u32,
    frame_mbs_only_flag: bool,
) -> HwdecResult<(u32, u32)> {
    let (sub_width, sub_height) = match chroma_array_type {
        1 => (2, 2),
        2 => (2, 1),
        _ => (1, 1),
    };
    let unit_y = sub_height * if frame_mbs_only_flag { 1 } else { 2 };

    let crop_x = crop
        .left
        .checked_add(crop.right)
        .and_then(|v| v.checked_mul(sub_width));
    let crop_y = crop
        .top
        .checked_add(crop.bottom)
        .and_then(|v| v.checked_mul(unit_y));
    match (crop_x, crop_y) {
        (Some(x), Some(y)) if x < width && y < height => Ok((width - x, height - y)),
        _ => Err(HwdecError::MalformedSyntax(format!(
            "H264: 裁剪参数非法, coded={}x{}, crop={:?}",
            width, height, crop
        ))),
    }
}

fn parse_vui(br: &mut BitReader) -> HwdecResult<Vui> {
    let mut vui = Vui {
        sar: (0, 1),
        ..Vui::default()
    };

    if br.read_flag() {
        vui.aspect_ratio_idc = br.read_bits(8) as u8;
        vui.sar = if vui.aspect_ratio_idc == EXTENDED_SAR {
            (br.read_bits(16), br.read_bits(16))
        } else {
            // 保留值按未指定处理
            SAR_TABLE
                .get(usize::from(vui.aspect_ratio_idc))
                .copied()
                .unwrap_or((0, 1))
        };
    }

    if br.read_flag() {
        vui.overscan_appropriate = Some(br.read_flag());
    }

    if br.read_flag() {
        vui.video_format = Some(br.read_bits(3) as u8);
        vui.video_full_range_flag = br.read_flag();
        if br.read_flag() {
            vui.colour_description = Some(ColourDescription {
                colour_primaries: br.read_bits(8) as u8,
                transfer_characteristics: br.read_bits(8) as u8,
                matrix_coefficients: br.read_bits(8) as u8,
            });
        }
    }

    if br.read_flag() {
        let top = br.read_ue();
        let bottom = br.read_ue();
        check_range("chroma_sample_loc_type_top_field", top, 5)?;
        check_range("chroma_sample_loc_type_bottom_field", bottom, 5)?;
        vui.chroma_sample_loc = Some((top, bottom));
    }

    if br.read_flag() {
        vui.timing = Some(TimingInfo {
            num_units_in_tick: br.read_bits(32),
            time_scale: br.read_bits(32),
            fixed_frame_rate_flag: br.read_flag(),
        });
    }

    if br.read_flag() {
        vui.nal_hrd = Some(parse_hrd(br)?);
    }
    if br.read_flag() {
        vui.vcl_hrd = Some(parse_hrd(br)?);
    }
    if vui.nal_hrd.is_some() || vui.vcl_hrd.is_some() {
        vui.low_delay_hrd_flag = br.read_flag();
    }
    vui.pic_struct_present_flag = br.read_flag();

    if br.read_flag() {
        let restriction = BitstreamRestriction {
            motion_vectors_over_pic_boundaries_flag: br.read_flag(),
            max_bytes_per_pic_denom: br.read_ue(),
            max_bits_per_mb_denom: br.read_ue(),
            log2_max_mv_length_horizontal: br.read_ue(),
            log2_max_mv_length_vertical: br.read_ue(),
            max_num_reorder_frames: br.read_ue(),
            max_dec_frame_buffering: br.read_ue(),
        };
        let restriction = if restriction.max_dec_frame_buffering > MAX_DEC_FRAME_BUFFERING {
            warn!(
                "H264: max_dec_frame_buffering 超出范围, 截断为 {}, value={}",
                MAX_DEC_FRAME_BUFFERING, restriction.max_dec_frame_buffering
            );
            BitstreamRestriction {
                max_dec_frame_buffering: MAX_DEC_FRAME_BUFFERING,
                ..restriction
            }
        } else {
            restriction
        };
        vui.bitstream_restriction = Some(restriction);
    }

    Ok(vui)
}

fn parse_hrd(br: &mut BitReader) -> HwdecResult<HrdParameters> {
    let cpb_cnt_minus1 = br.read_ue();
    check_range("cpb_cnt_minus1", cpb_cnt_minus1, 31)?;
    let bit_rate_scale = br.read_bits(4) as u8;
    let cpb_size_scale = br.read_bits(4) as u8;

    let cpbs = (0..=cpb_cnt_minus1)
        .map(|_| CpbSpec {
            bit_rate_value_minus1: br.read_ue(),
            cpb_size_value_minus1: br.read_ue(),
            cbr_flag: br.read_flag(),
        })
        .collect();

    Ok(HrdParameters {
        bit_rate_scale,
        cpb_size_scale,
        cpbs,
        initial_cpb_removal_delay_length: br.read_bits(5) as u8 + 1,
        cpb_removal_delay_length: br.read_bits(5) as u8 + 1,
        dpb_output_delay_length: br.read_bits(5) as u8 + 1,
        time_offset_length: br.read_bits(5) as u8,
    })
}
