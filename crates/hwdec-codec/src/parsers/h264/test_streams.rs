//! 测试用 SPS/PPS/切片头码流构造器.

use hwdec_core::BitWriter;

use super::nal::encode_nal;

/// SPS 构造参数 (默认: Baseline, 640x480, 4:2:0, POC 类型 0)
#[derive(Debug, Clone)]
pub(crate) struct SpsParams {
    pub sps_id: u32,
    pub profile_idc: u8,
    pub width_mbs: u32,
    pub height_map_units: u32,
    pub frame_mbs_only: bool,
    pub log2_max_frame_num_minus4: u32,
    pub poc_type: u32,
    pub log2_max_poc_lsb_minus4: u32,
    pub delta_pic_order_always_zero: bool,
    pub offset_for_non_ref_pic: i32,
    pub offset_for_top_to_bottom_field: i32,
    pub offset_for_ref_frame: Vec<i32>,
    pub num_ref_frames: u32,
    pub crop_bottom: u32,
    /// (num_units_in_tick, time_scale)
    pub vui_timing: Option<(u32, u32)>,
    pub vui_max_dec_frame_buffering: Option<u32>,
}

impl Default for SpsParams {
    fn default() -> Self {
        Self {
            sps_id: 0,
            profile_idc: 66,
            width_mbs: 40,
            height_map_units: 30,
            frame_mbs_only: true,
            log2_max_frame_num_minus4: 0,
            poc_type: 0,
            log2_max_poc_lsb_minus4: 2,
            delta_pic_order_always_zero: false,
            offset_for_non_ref_pic: 0,
            offset_for_top_to_bottom_field: 0,
            offset_for_ref_frame: Vec::new(),
            num_ref_frames: 4,
            crop_bottom: 0,
            vui_timing: None,
            vui_max_dec_frame_buffering: None,
        }
    }
}

/// PPS 构造参数
#[derive(Debug, Clone)]
pub(crate) struct PpsParams {
    pub pps_id: u32,
    pub sps_id: u32,
    pub bottom_field_pic_order_in_frame_present: bool,
    /// (num_slice_groups_minus1, slice_group_map_type 3..=5, change_rate_minus1)
    pub slice_groups: Option<(u32, u32, u32)>,
    pub pic_init_qp_minus26: i32,
    pub chroma_qp_index_offset: i32,
    pub redundant_pic_cnt_present: bool,
    /// 携带扩展字段 (transform_8x8_mode_flag=1) 时的 second_chroma_qp_index_offset
    pub transform_8x8_mode: Option<i32>,
}

impl Default for PpsParams {
    fn default() -> Self {
        Self {
            pps_id: 0,
            sps_id: 0,
            bottom_field_pic_order_in_frame_present: false,
            slice_groups: None,
            pic_init_qp_minus26: 0,
            chroma_qp_index_offset: 0,
            redundant_pic_cnt_present: false,
            transform_8x8_mode: None,
        }
    }
}

/// 切片头构造参数
#[derive(Debug, Clone)]
pub(crate) struct SliceParams {
    pub nal_unit_type: u8,
    pub nal_ref_idc: u8,
    pub first_mb: u32,
    /// slice_type 语法值
    pub slice_type: u32,
    pub frame_num: u32,
    /// Some(bottom_field_flag) 表示场图像
    pub field: Option<bool>,
    pub idr_pic_id: u32,
    pub poc_lsb: u32,
    pub delta_poc_bottom: i32,
    pub delta_poc: [i32; 2],
    /// (l0, l1) 激活数
    pub num_ref_idx_override: Option<(u32, u32)>,
    pub no_output_of_prior_pics: bool,
    pub long_term_reference: bool,
    /// (mmco, 参数 1, 参数 2)
    pub mmco: Option<Vec<(u32, u32, u32)>>,
    pub slice_group_change_cycle: u32,
}

impl SliceParams {
    /// IDR I 切片
    pub fn idr(idr_pic_id: u32) -> Self {
        Self {
            nal_unit_type: 5,
            nal_ref_idc: 3,
            first_mb: 0,
            slice_type: 7,
            frame_num: 0,
            field: None,
            idr_pic_id,
            poc_lsb: 0,
            delta_poc_bottom: 0,
            delta_poc: [0; 2],
            num_ref_idx_override: None,
            no_output_of_prior_pics: false,
            long_term_reference: false,
            mmco: None,
            slice_group_change_cycle: 0,
        }
    }

    /// 参考 P 切片
    pub fn p(frame_num: u32) -> Self {
        Self {
            nal_unit_type: 1,
            nal_ref_idc: 2,
            slice_type: 0,
            frame_num,
            poc_lsb: frame_num * 2,
            ..Self::idr(0)
        }
    }

    /// 非参考 B 切片
    pub fn b(frame_num: u32, poc_lsb: u32) -> Self {
        Self {
            nal_unit_type: 1,
            nal_ref_idc: 0,
            slice_type: 1,
            frame_num,
            poc_lsb,
            ..Self::idr(0)
        }
    }
}

pub(crate) fn sps_rbsp(p: &SpsParams) -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(u32::from(p.profile_idc), 8);
    bw.write_bits(0, 8);
    bw.write_bits(30, 8);
    bw.write_ue(p.sps_id);
    bw.write_ue(p.log2_max_frame_num_minus4);
    bw.write_ue(p.poc_type);
    match p.poc_type {
        0 => bw.write_ue(p.log2_max_poc_lsb_minus4),
        1 => {
            bw.write_flag(p.delta_pic_order_always_zero);
            bw.write_se(p.offset_for_non_ref_pic);
            bw.write_se(p.offset_for_top_to_bottom_field);
            bw.write_ue(p.offset_for_ref_frame.len() as u32);
            for &offset in &p.offset_for_ref_frame {
                bw.write_se(offset);
            }
        }
        _ => {}
    }
    bw.write_ue(p.num_ref_frames);
    bw.write_flag(false);
    bw.write_ue(p.width_mbs - 1);
    bw.write_ue(p.height_map_units - 1);
    bw.write_flag(p.frame_mbs_only);
    if !p.frame_mbs_only {
        bw.write_flag(false);
    }
    bw.write_flag(true);
    if p.crop_bottom > 0 {
        bw.write_flag(true);
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(p.crop_bottom);
    } else {
        bw.write_flag(false);
    }

    let has_vui = p.vui_timing.is_some() || p.vui_max_dec_frame_buffering.is_some();
    bw.write_flag(has_vui);
    if has_vui {
        bw.write_flag(false); // aspect_ratio_info_present_flag
        bw.write_flag(false); // overscan_info_present_flag
        bw.write_flag(false); // video_signal_type_present_flag
        bw.write_flag(false); // chroma_loc_info_present_flag
        match p.vui_timing {
            Some((num_units_in_tick, time_scale)) => {
                bw.write_flag(true);
                bw.write_bits(num_units_in_tick, 32);
                bw.write_bits(time_scale, 32);
                bw.write_flag(true);
            }
            None => bw.write_flag(false),
        }
        bw.write_flag(false); // nal_hrd
        bw.write_flag(false); // vcl_hrd
        bw.write_flag(false); // pic_struct_present_flag
        match p.vui_max_dec_frame_buffering {
            Some(max_dec) => {
                bw.write_flag(true);
                bw.write_flag(true);
                bw.write_ue(2);
                bw.write_ue(1);
                bw.write_ue(16);
                bw.write_ue(16);
                bw.write_ue(max_dec);
                bw.write_ue(max_dec);
            }
            None => bw.write_flag(false),
        }
    }
    bw.write_rbsp_trailing_bits();
    bw.finish()
}

pub(crate) fn pps_rbsp(p: &PpsParams) -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_ue(p.pps_id);
    bw.write_ue(p.sps_id);
    bw.write_flag(false);
    bw.write_flag(p.bottom_field_pic_order_in_frame_present);
    match p.slice_groups {
        Some((groups_minus1, map_type, rate_minus1)) => {
            bw.write_ue(groups_minus1);
            bw.write_ue(map_type);
            bw.write_flag(false);
            bw.write_ue(rate_minus1);
        }
        None => bw.write_ue(0),
    }
    bw.write_ue(0);
    bw.write_ue(0);
    bw.write_flag(false);
    bw.write_bits(0, 2);
    bw.write_se(p.pic_init_qp_minus26);
    bw.write_se(0);
    bw.write_se(p.chroma_qp_index_offset);
    bw.write_flag(true); // deblocking_filter_control_present_flag
    bw.write_flag(false);
    bw.write_flag(p.redundant_pic_cnt_present);
    if let Some(second_offset) = p.transform_8x8_mode {
        bw.write_flag(true);
        bw.write_flag(false);
        bw.write_se(second_offset);
    }
    bw.write_rbsp_trailing_bits();
    bw.finish()
}

pub(crate) fn slice_rbsp(sps: &SpsParams, pps: &PpsParams, s: &SliceParams) -> Vec<u8> {
    let mut bw = BitWriter::new();
    let idr = s.nal_unit_type == 5;
    let slice_kind = s.slice_type % 5;
    let field_pic = s.field.is_some();

    bw.write_ue(s.first_mb);
    bw.write_ue(s.slice_type);
    bw.write_ue(pps.pps_id);
    bw.write_bits(s.frame_num, sps.log2_max_frame_num_minus4 + 4);
    if !sps.frame_mbs_only {
        bw.write_flag(field_pic);
        if let Some(bottom) = s.field {
            bw.write_flag(bottom);
        }
    }
    if idr {
        bw.write_ue(s.idr_pic_id);
    }
    match sps.poc_type {
        0 => {
            bw.write_bits(s.poc_lsb, sps.log2_max_poc_lsb_minus4 + 4);
            if pps.bottom_field_pic_order_in_frame_present && !field_pic {
                bw.write_se(s.delta_poc_bottom);
            }
        }
        1 if !sps.delta_pic_order_always_zero => {
            bw.write_se(s.delta_poc[0]);
            if pps.bottom_field_pic_order_in_frame_present && !field_pic {
                bw.write_se(s.delta_poc[1]);
            }
        }
        _ => {}
    }
    if pps.redundant_pic_cnt_present {
        bw.write_ue(0);
    }
    if slice_kind == 1 {
        bw.write_flag(true); // direct_spatial_mv_pred_flag
    }
    if matches!(slice_kind, 0 | 1 | 3) {
        match s.num_ref_idx_override {
            Some((l0, l1)) => {
                bw.write_flag(true);
                bw.write_ue(l0 - 1);
                if slice_kind == 1 {
                    bw.write_ue(l1 - 1);
                }
            }
            None => bw.write_flag(false),
        }
    }
    if !matches!(slice_kind, 2 | 4) {
        bw.write_flag(false);
        if slice_kind == 1 {
            bw.write_flag(false);
        }
    }
    if s.nal_ref_idc != 0 {
        if idr {
            bw.write_flag(s.no_output_of_prior_pics);
            bw.write_flag(s.long_term_reference);
        } else if let Some(ops) = &s.mmco {
            bw.write_flag(true);
            for &(op, a, b) in ops {
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
        } else {
            bw.write_flag(false);
        }
    }
    bw.write_se(0); // slice_qp_delta
    bw.write_ue(0); // disable_deblocking_filter_idc
    bw.write_se(0);
    bw.write_se(0);
    if let Some((_, _, rate_minus1)) = pps.slice_groups {
        let map_units = sps.width_mbs * sps.height_map_units;
        let bits = super::pps::ceil_log2(map_units.div_ceil(rate_minus1 + 1) + 1);
        bw.write_bits(s.slice_group_change_cycle, bits);
    }
    // 模拟宏块数据
    bw.write_bits(0xA5, 8);
    bw.write_rbsp_trailing_bits();
    bw.finish()
}

/// 组装带头部的 NAL 单元 (含防竞争字节, 不含起始码)
pub(crate) fn nal_unit(nal_ref_idc: u8, nal_unit_type: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut out = vec![(nal_ref_idc << 5) | nal_unit_type];
    out.extend(encode_nal(rbsp));
    out
}
