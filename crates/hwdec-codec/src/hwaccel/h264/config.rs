//! 解码驱动配置.

use super::dpb::MAX_DPB_SIZE;

/// [`H264HwDecoder`](super::H264HwDecoder) 配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// DPB 容量 (输出重排序延迟), 限制在 1..=16
    pub dpb_size: usize,
    /// IDR 且未设置 no_output_of_prior_pics_flag 时先输出之前的全部图像
    pub drain_on_idr: bool,
    /// 将相反奇偶性, frame_num 相同的连续两个场合并到同一个表面
    pub pair_fields: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            dpb_size: MAX_DPB_SIZE,
            drain_on_idr: true,
            pair_fields: true,
        }
    }
}

impl DecoderConfig {
    pub fn with_dpb_size(mut self, dpb_size: usize) -> Self {
        self.dpb_size = dpb_size;
        self
    }

    pub fn with_drain_on_idr(mut self, drain_on_idr: bool) -> Self {
        self.drain_on_idr = drain_on_idr;
        self
    }

    pub fn with_pair_fields(mut self, pair_fields: bool) -> Self {
        self.pair_fields = pair_fields;
        self
    }

    /// 实际使用的 DPB 容量
    pub fn effective_dpb_size(&self) -> usize {
        self.dpb_size.clamp(1, MAX_DPB_SIZE)
    }
}
