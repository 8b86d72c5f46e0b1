//! 比特流读取器.
//!
//! 按大端位序 (MSB first) 从 RBSP 缓冲区中读取定长字段与 Exp-Golomb 变长字段.
//!
//! 越过缓冲区末尾的读取返回补零位而不是失败, 同时置位溢出标志,
//! 由上层解析器决定是否把截断的语法结构当作错误记录.

/// 比特流读取器
///
/// # 示例
/// ```
/// use hwdec_core::bitreader::BitReader;
///
/// let data = [0b1011_0001, 0b0101_0101];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bits(4), 0b1011);
/// assert_eq!(br.read_bits(4), 0b0001);
/// assert_eq!(br.read_bits(8), 0b0101_0101);
/// assert!(!br.is_overrun());
/// ```
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    /// 源数据
    data: &'a [u8],
    /// 当前字节索引
    byte_pos: usize,
    /// 当前字节中的位位置 (0-7, 0 表示最高位)
    bit_pos: u8,
    /// 是否读到了缓冲区末尾之外
    overrun: bool,
}

impl<'a> BitReader<'a> {
    /// 创建新的比特流读取器
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
            overrun: false,
        }
    }

    /// 获取已读取的总位数 (包含补零的虚拟位)
    pub fn bits_read(&self) -> usize {
        self.byte_pos * 8 + self.bit_pos as usize
    }

    /// 获取剩余可读位数
    pub fn bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.bits_read())
    }

    /// 是否已到达末尾
    pub fn is_eof(&self) -> bool {
        self.bits_left() == 0
    }

    /// 是否发生过越界读取
    pub fn is_overrun(&self) -> bool {
        self.overrun
    }

    /// 当前字节位置
    pub fn byte_position(&self) -> usize {
        self.byte_pos
    }

    /// 读取 1 个位, 越界时返回 0
    pub fn read_bit(&mut self) -> u32 {
        let bit = match self.data.get(self.byte_pos) {
            Some(byte) => u32::from((byte >> (7 - self.bit_pos)) & 1),
            None => {
                self.overrun = true;
                0
            }
        };
        self.advance(1);
        bit
    }

    /// 读取 1 位标志
    pub fn read_flag(&mut self) -> bool {
        self.read_bit() != 0
    }

    /// 读取 N 个位 (最多 32 位, 超出部分被截断到 32)
    ///
    /// 越界部分按 0 补齐.
    pub fn read_bits(&mut self, n: u32) -> u32 {
        let n = n.min(32);
        let mut result: u32 = 0;
        let mut remaining = n;

        while remaining > 0 {
            let Some(&byte) = self.data.get(self.byte_pos) else {
                // 剩余位全部补零
                self.overrun = true;
                result = if remaining >= 32 { 0 } else { result << remaining };
                self.advance(remaining as usize);
                break;
            };

            let available = 8 - u32::from(self.bit_pos);
            let to_read = remaining.min(available);
            let shift = available - to_read;
            let mask = ((1u32 << to_read) - 1) as u8;
            let bits = (byte >> shift) & mask;

            result = (result << to_read) | u32::from(bits);
            self.advance(to_read as usize);
            remaining -= to_read;
        }

        result
    }

    /// 窥视 N 个位 (不移动位置, 不影响溢出标志)
    pub fn peek_bits(&mut self, n: u32) -> u32 {
        let saved = (self.byte_pos, self.bit_pos, self.overrun);
        let value = self.read_bits(n);
        (self.byte_pos, self.bit_pos, self.overrun) = saved;
        value
    }

    /// 跳过 N 个位
    pub fn skip_bits(&mut self, n: usize) {
        if n > self.bits_left() {
            self.overrun = true;
        }
        self.advance(n);
    }

    /// 对齐到下一个字节边界
    pub fn align_to_byte(&mut self) {
        if self.bit_pos > 0 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
    }

    /// 读取无符号 Exp-Golomb 编码 ue(v)
    ///
    /// 前导零个数上限为 32, 结果在 `u32::MAX` 处饱和.
    pub fn read_ue(&mut self) -> u32 {
        let mut leading_zeros = 0u32;
        while leading_zeros < 32 && self.read_bit() == 0 {
            leading_zeros += 1;
        }
        if leading_zeros == 0 {
            return 0;
        }
        let suffix = u64::from(self.read_bits(leading_zeros));
        let value = (1u64 << leading_zeros) - 1 + suffix;
        u32::try_from(value).unwrap_or(u32::MAX)
    }

    /// 读取有符号 Exp-Golomb 编码 se(v)
    pub fn read_se(&mut self) -> i32 {
        let code = i64::from(self.read_ue());
        let value = if code & 1 == 1 {
            (code + 1) / 2
        } else {
            -(code / 2)
        };
        value as i32
    }

    /// 检查当前位置之后是否只剩 rbsp_trailing_bits
    ///
    /// 剩余位为单个 1 后跟全 0 (或已无剩余位) 时返回 true. 不移动位置.
    pub fn rbsp_trailing_bits(&self) -> bool {
        let mut probe = self.clone();
        let left = probe.bits_left();
        if left == 0 {
            return true;
        }
        if probe.read_bit() != 1 {
            return false;
        }
        let mut rest = left - 1;
        while rest > 0 {
            let chunk = rest.min(32) as u32;
            if probe.read_bits(chunk) != 0 {
                return false;
            }
            rest -= chunk as usize;
        }
        true
    }

    /// 是否还有 RBSP 数据 (more_rbsp_data)
    pub fn more_rbsp_data(&self) -> bool {
        !self.rbsp_trailing_bits()
    }

    fn advance(&mut self, bits: usize) {
        let total = self.bit_pos as usize + bits;
        self.byte_pos += total / 8;
        self.bit_pos = (total % 8) as u8;
    }
}
