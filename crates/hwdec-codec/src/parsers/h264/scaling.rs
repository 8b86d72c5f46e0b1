//! 量化矩阵 (scaling list) 解析.
//!
//! 码流中的系数按 zigzag 扫描顺序出现, 这里统一转换为光栅顺序存储,
//! 与硬件解码参数块的布局一致.
//!
//! 列表编号: 0-5 为 4x4 (帧内 Y/Cb/Cr, 帧间 Y/Cb/Cr), 6 起为 8x8
//! (4:2:0 / 4:2:2 只有帧内 Y 与帧间 Y 两组, 4:4:4 为六组).

use hwdec_core::BitReader;

/// 默认 4x4 帧内矩阵 (光栅顺序)
pub const DEFAULT_4X4_INTRA: [u8; 16] = [
    6, 13, 20, 28, 13, 20, 28, 32, 20, 28, 32, 37, 28, 32, 37, 42,
];
/// 默认 4x4 帧间矩阵 (光栅顺序)
pub const DEFAULT_4X4_INTER: [u8; 16] = [
    10, 14, 20, 24, 14, 20, 24, 27, 20, 24, 27, 30, 24, 27, 30, 34,
];
/// 默认 8x8 帧内矩阵 (光栅顺序)
pub const DEFAULT_8X8_INTRA: [u8; 64] = [
    6, 10, 13, 16, 18, 23, 25, 27, 10, 11, 16, 18, 23, 25, 27, 29, 13, 16, 18, 23, 25, 27, 29, 31,
    16, 18, 23, 25, 27, 29, 31, 33, 18, 23, 25, 27, 29, 31, 33, 36, 23, 25, 27, 29, 31, 33, 36, 38,
    25, 27, 29, 31, 33, 36, 38, 40, 27, 29, 31, 33, 36, 38, 40, 42,
];
/// 默认 8x8 帧间矩阵 (光栅顺序)
pub const DEFAULT_8X8_INTER: [u8; 64] = [
    9, 13, 15, 17, 19, 21, 22, 24, 13, 13, 17, 19, 21, 22, 24, 25, 15, 17, 19, 21, 22, 24, 25, 27,
    17, 19, 21, 22, 24, 25, 27, 28, 19, 21, 22, 24, 25, 27, 28, 30, 21, 22, 24, 25, 27, 28, 30, 32,
    22, 24, 25, 27, 28, 30, 32, 33, 24, 25, 27, 28, 30, 32, 33, 35,
];

const ZIGZAG_4X4: [usize; 16] = [0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15];

const ZIGZAG_8X8: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27, 20,
    13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58, 59,
    52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// 一组完整的量化矩阵
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingMatrix {
    pub lists_4x4: [[u8; 16]; 6],
    /// 4:2:0 / 4:2:2 只使用前两组
    pub lists_8x8: [[u8; 64]; 6],
}

impl Default for ScalingMatrix {
    fn default() -> Self {
        Self::flat()
    }
}

impl ScalingMatrix {
    /// Flat_4x4_16 / Flat_8x8_16, 未携带矩阵时使用
    pub fn flat() -> Self {
        Self {
            lists_4x4: [[16; 16]; 6],
            lists_8x8: [[16; 64]; 6],
        }
    }
}

/// 缺省列表的回退规则
#[derive(Debug, Clone, Copy)]
pub enum Fallback<'a> {
    /// 规则 A: 回退到默认矩阵
    Default,
    /// 规则 B: 回退到序列级矩阵
    Sequence(&'a ScalingMatrix),
}

/// 解析 `list_count` 组量化矩阵 (8 或 12)
pub fn parse_scaling_matrix(
    br: &mut BitReader,
    list_count: usize,
    fallback: Fallback<'_>,
) -> ScalingMatrix {
    let mut matrix = ScalingMatrix::flat();

    for idx in 0..list_count.min(12) {
        let present = br.read_flag();
        if idx < 6 {
            let list = if present {
                read_scaling_list::<16>(br, &ZIGZAG_4X4)
            } else {
                None
            };
            matrix.lists_4x4[idx] = match list {
                Some(list) => list,
                None if present => default_4x4(idx),
                None => absent_4x4(&matrix, idx, fallback),
            };
        } else {
            let i8 = idx - 6;
            let list = if present {
                read_scaling_list::<64>(br, &ZIGZAG_8X8)
            } else {
                None
            };
            matrix.lists_8x8[i8] = match list {
                Some(list) => list,
                None if present => default_8x8(i8),
                None => absent_8x8(&matrix, i8, fallback),
            };
        }
    }

    matrix
}

/// 读取单个列表, 返回 `None` 表示 useDefaultScalingMatrixFlag
fn read_scaling_list<const N: usize>(br: &mut BitReader, scan: &[usize; N]) -> Option<[u8; N]> {
    let mut list = [0u8; N];
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;

    for (pos, &raster) in scan.iter().enumerate() {
        if next_scale != 0 {
            let delta_scale = br.read_se();
            next_scale = (i64::from(last_scale) + i64::from(delta_scale)).rem_euclid(256) as i32;
            if pos == 0 && next_scale == 0 {
                return None;
            }
        }
        let scale = if next_scale == 0 { last_scale } else { next_scale };
        list[raster] = scale as u8;
        last_scale = scale;
    }

    Some(list)
}

fn default_4x4(idx: usize) -> [u8; 16] {
    if idx < 3 {
        DEFAULT_4X4_INTRA
    } else {
        DEFAULT_4X4_INTER
    }
}

fn default_8x8(idx: usize) -> [u8; 64] {
    if idx % 2 == 0 {
        DEFAULT_8X8_INTRA
    } else {
        DEFAULT_8X8_INTER
    }
}

fn absent_4x4(matrix: &ScalingMatrix, idx: usize, fallback: Fallback<'_>) -> [u8; 16] {
    match (idx, fallback) {
        (0 | 3, Fallback::Default) => default_4x4(idx),
        (0 | 3, Fallback::Sequence(seq)) => seq.lists_4x4[idx],
        _ => matrix.lists_4x4[idx - 1],
    }
}

fn absent_8x8(matrix: &ScalingMatrix, idx: usize, fallback: Fallback<'_>) -> [u8; 64] {
    match (idx, fallback) {
        (0 | 1, Fallback::Default) => default_8x8(idx),
        (0 | 1, Fallback::Sequence(seq)) => seq.lists_8x8[idx],
        _ => matrix.lists_8x8[idx - 2],
    }
}
