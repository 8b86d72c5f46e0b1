//! H.264 NAL (Network Abstraction Layer) 单元.
//!
//! # NAL 头部 (1 字节)
//! ```text
//! ┌──────────────────────────────────────┐
//! │ forbidden(1) | ref_idc(2) | type(5)  │
//! └──────────────────────────────────────┘
//! ```
//!
//! 输入可以是 Annex B 字节流 (`00 00 01` / `00 00 00 01` 起始码),
//! 也可以是 MP4 中的长度前缀 (AVCC) 样本. 分割结果与输入共享同一块 [`Bytes`] 内存.

use bytes::Bytes;
use hwdec_core::{HwdecError, HwdecResult};

/// NAL 单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// 非 IDR 图像切片
    Slice,
    /// 数据分区 A
    SliceDpa,
    /// 数据分区 B
    SliceDpb,
    /// 数据分区 C
    SliceDpc,
    /// IDR 图像切片
    SliceIdr,
    /// 增补增强信息
    Sei,
    Sps,
    Pps,
    /// 访问单元分隔符
    Aud,
    EndOfSequence,
    EndOfStream,
    FillerData,
    SpsExtension,
    /// 其他 (保留或扩展类型)
    Unknown(u8),
}

impl NalUnitType {
    /// 从 NAL 类型编号创建
    pub fn from_type_id(type_id: u8) -> Self {
        match type_id {
            1 => Self::Slice,
            2 => Self::SliceDpa,
            3 => Self::SliceDpb,
            4 => Self::SliceDpc,
            5 => Self::SliceIdr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::FillerData,
            13 => Self::SpsExtension,
            _ => Self::Unknown(type_id),
        }
    }

    /// 类型编号 (nal_unit_type)
    pub fn type_id(&self) -> u8 {
        match self {
            Self::Slice => 1,
            Self::SliceDpa => 2,
            Self::SliceDpb => 3,
            Self::SliceDpc => 4,
            Self::SliceIdr => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
            Self::EndOfSequence => 10,
            Self::EndOfStream => 11,
            Self::FillerData => 12,
            Self::SpsExtension => 13,
            Self::Unknown(id) => *id,
        }
    }

    /// 是否携带完整切片头 (类型 1 与 5)
    ///
    /// 数据分区 B/C 不含切片头, 分区 A 需要额外的分区语法, 这里不作为切片处理.
    pub fn has_slice_header(&self) -> bool {
        matches!(self, Self::Slice | Self::SliceIdr)
    }

    /// 是否为 IDR
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::SliceIdr)
    }
}

impl std::fmt::Display for NalUnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Slice => write!(f, "Slice"),
            Self::SliceDpa => write!(f, "SliceDPA"),
            Self::SliceDpb => write!(f, "SliceDPB"),
            Self::SliceDpc => write!(f, "SliceDPC"),
            Self::SliceIdr => write!(f, "IDR"),
            Self::Sei => write!(f, "SEI"),
            Self::Sps => write!(f, "SPS"),
            Self::Pps => write!(f, "PPS"),
            Self::Aud => write!(f, "AUD"),
            Self::EndOfSequence => write!(f, "EndOfSeq"),
            Self::EndOfStream => write!(f, "EndOfStream"),
            Self::FillerData => write!(f, "Filler"),
            Self::SpsExtension => write!(f, "SPSExt"),
            Self::Unknown(id) => write!(f, "Unknown({id})"),
        }
    }
}

/// NAL 单元 (不含起始码, 含 1 字节头部)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    pub nal_type: NalUnitType,
    /// nal_ref_idc (0-3), 非 0 表示被参考
    pub ref_idc: u8,
    pub data: Bytes,
}

impl NalUnit {
    /// 解析 NAL 头部, 数据与输入共享
    pub fn parse(data: Bytes) -> HwdecResult<Self> {
        let Some(&header) = data.first() else {
            return Err(HwdecError::MalformedSyntax("H264: NAL 单元数据为空".into()));
        };
        if header & 0x80 != 0 {
            return Err(HwdecError::MalformedSyntax(format!(
                "H264: forbidden_zero_bit 非法, header=0x{header:02X}"
            )));
        }
        Ok(Self {
            nal_type: NalUnitType::from_type_id(header & 0x1F),
            ref_idc: (header >> 5) & 0x03,
            data,
        })
    }

    /// 去除头部与防竞争字节后的 RBSP
    pub fn rbsp(&self) -> HwdecResult<Vec<u8>> {
        decode_nal(self.data.get(1..).unwrap_or_default())
    }
}

/// 去除防竞争字节: 每个 `00 00 03` 替换为 `00 00`
///
/// 输出缓冲区按输入长度预留, 分配失败时返回 `OutOfMemory`.
pub fn decode_nal(buf: &[u8]) -> HwdecResult<Vec<u8>> {
    let mut out = Vec::new();
    out.try_reserve_exact(buf.len())?;

    let mut zeros = 0usize;
    for &byte in buf {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0x00 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    Ok(out)
}

/// 插入防竞争字节, 使 RBSP 中不出现起始码前缀
pub fn encode_nal(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + rbsp.len() / 64 + 1);
    let mut zeros = 0usize;
    for &byte in rbsp {
        if zeros >= 2 && byte <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        zeros = if byte == 0x00 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

/// 从 Annex B 字节流中分割出所有 NAL 单元
///
/// 返回的 NAL 单元不含起始码与尾随零字节. 头部非法的单元被跳过.
pub fn split_annex_b(data: &Bytes) -> Vec<NalUnit> {
    let mut nalus = Vec::new();
    let starts = start_code_payloads(data);

    for (i, &begin) in starts.iter().enumerate() {
        // 下一个起始码 (3 字节) 之前
        let mut end = starts.get(i + 1).map_or(data.len(), |&next| next - 3);
        while end > begin && data[end - 1] == 0x00 {
            end -= 1;
        }
        if end <= begin {
            continue;
        }
        match NalUnit::parse(data.slice(begin..end)) {
            Ok(nalu) => nalus.push(nalu),
            Err(err) => log::debug!("H264: 跳过非法 NAL, offset={}, {}", begin, err),
        }
    }

    nalus
}

/// 返回每个起始码之后的负载起点
fn start_code_payloads(data: &[u8]) -> Vec<usize> {
    let mut payloads = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            payloads.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }
    payloads
}

/// 从长度前缀 (AVCC) 样本中提取 NAL 单元
///
/// `length_size` 取自 avcC 的 lengthSizeMinusOne + 1, 合法值为 1, 2, 4.
pub fn split_avcc(data: &Bytes, length_size: usize) -> HwdecResult<Vec<NalUnit>> {
    if !matches!(length_size, 1 | 2 | 4) {
        return Err(HwdecError::InvalidArgument(format!(
            "H264: NAL 长度前缀大小非法, length_size={length_size}"
        )));
    }

    let mut nalus = Vec::new();
    let mut pos = 0;
    while pos + length_size <= data.len() {
        let nal_len = data[pos..pos + length_size]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        pos += length_size;

        if pos + nal_len > data.len() {
            return Err(HwdecError::MalformedSyntax(format!(
                "H264: AVCC NAL 截断, declared_len={}, remain={}",
                nal_len,
                data.len() - pos
            )));
        }
        if nal_len > 0 {
            match NalUnit::parse(data.slice(pos..pos + nal_len)) {
                Ok(nalu) => nalus.push(nalu),
                Err(err) => log::debug!("H264: 跳过非法 NAL, offset={}, {}", pos, err),
            }
        }
        pos += nal_len;
    }

    Ok(nalus)
}

/// avcC 配置 (AVCDecoderConfigurationRecord)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvccConfig {
    pub profile_idc: u8,
    pub level_idc: u8,
    /// NAL 长度前缀大小 (字节)
    pub length_size: usize,
    pub sps_list: Vec<Bytes>,
    pub pps_list: Vec<Bytes>,
}

/// 解析 MP4 avcC box 内容
pub fn parse_avcc_config(data: &Bytes) -> HwdecResult<AvccConfig> {
    if data.len() < 7 {
        return Err(HwdecError::MalformedSyntax("H264: avcC 数据太短".into()));
    }
    if data[0] != 1 {
        return Err(HwdecError::MalformedSyntax(format!(
            "H264: avcC 版本不支持, version={}",
            data[0]
        )));
    }

    let length_size = usize::from(data[4] & 0x03) + 1;
    let mut pos = 5;

    let num_sps = usize::from(data[pos] & 0x1F);
    pos += 1;
    let sps_list = read_param_set_array(data, &mut pos, num_sps, "SPS")?;

    let Some(&num_pps) = data.get(pos) else {
        return Err(HwdecError::MalformedSyntax(
            "H264: avcC 缺少 numOfPictureParameterSets 字段".into(),
        ));
    };
    pos += 1;
    let pps_list = read_param_set_array(data, &mut pos, usize::from(num_pps), "PPS")?;

    Ok(AvccConfig {
        profile_idc: data[1],
        level_idc: data[3],
        length_size,
        sps_list,
        pps_list,
    })
}

fn read_param_set_array(
    data: &Bytes,
    pos: &mut usize,
    count: usize,
    what: &str,
) -> HwdecResult<Vec<Bytes>> {
    let mut list = Vec::with_capacity(count);
    for index in 0..count {
        if *pos + 2 > data.len() {
            return Err(HwdecError::MalformedSyntax(format!(
                "H264: avcC {what} 长度字段截断, index={index}"
            )));
        }
        let len = usize::from(u16::from_be_bytes([data[*pos], data[*pos + 1]]));
        *pos += 2;
        if len == 0 || *pos + len > data.len() {
            return Err(HwdecError::MalformedSyntax(format!(
                "H264: avcC {what} 长度非法, index={}, declared_len={}, remain={}",
                index,
                len,
                data.len().saturating_sub(*pos)
            )));
        }
        list.push(data.slice(*pos..*pos + len));
        *pos += len;
    }
    Ok(list)
}
