//! 解码图像缓冲区 (DPB).
//!
//! 图像保存在带空洞的向量中, 以 [`PictureId`] 下标标识.
//! 每个图像在插入时持有一次锁, 当它既不再被参考也不再等待输出时释放,
//! 锁计数归零后立即调用 [`FrameHandle::free`] 归还帧.

use hwdec_core::{HwdecError, HwdecResult};
use log::{debug, warn};

use super::picture::{DecodedPicture, FrameHandle};

/// DPB 容量上限 (帧)
pub const MAX_DPB_SIZE: usize = 16;

/// DPB 中图像的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PictureId(usize);

impl PictureId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// 解码图像缓冲区
#[derive(Debug)]
pub struct Dpb<F: FrameHandle> {
    slots: Vec<Option<DecodedPicture<F>>>,
    /// 输出延迟容量
    size: usize,
    /// 参考帧上限 (来自 SPS)
    num_ref_frames: usize,
    used: usize,
}

impl<F: FrameHandle> Default for Dpb<F> {
    fn default() -> Self {
        Self::new(MAX_DPB_SIZE)
    }
}

impl<F: FrameHandle> Dpb<F> {
    /// 创建容量为 `size` 的 DPB (限制在 1..=16)
    pub fn new(size: usize) -> Self {
        Self {
            slots: Vec::new(),
            size: size.clamp(1, MAX_DPB_SIZE),
            num_ref_frames: 1,
            used: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn set_size(&mut self, size: usize) {
        self.size = size.clamp(1, MAX_DPB_SIZE);
    }

    /// 当前占用的图像数
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn num_ref_frames(&self) -> usize {
        self.num_ref_frames
    }

    pub fn picture(&self, id: PictureId) -> Option<&DecodedPicture<F>> {
        self.slots.get(id.0)?.as_ref()
    }

    pub fn picture_mut(&mut self, id: PictureId) -> Option<&mut DecodedPicture<F>> {
        self.slots.get_mut(id.0)?.as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PictureId, &DecodedPicture<F>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|pic| (PictureId(index), pic)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PictureId, &mut DecodedPicture<F>)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|pic| (PictureId(index), pic)))
    }

    /// 被参考的图像数 (短期与长期)
    pub fn reference_count(&self) -> usize {
        self.iter().filter(|(_, pic)| pic.is_reference()).count()
    }

    /// 插入图像并执行滑动窗口
    ///
    /// `pic` 应已持有一次锁. 参考图像超过 `num_ref_frames` 时, 按 FrameNumWrap
    /// 从小到大清除短期参考 (不包括刚插入的图像); 被清除且已输出的图像立即释放,
    /// 仍在等待输出的图像在 [`Dpb::set_output_picture`] 时释放.
    pub fn add_picture(
        &mut self,
        pic: DecodedPicture<F>,
        num_ref_frames: u32,
    ) -> HwdecResult<PictureId> {
        self.num_ref_frames = (num_ref_frames as usize).max(1);

        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(pic);
                index
            }
            None => {
                if let Err(err) = self.slots.try_reserve(1) {
                    pic.frame.free();
                    return Err(err.into());
                }
                self.slots.push(Some(pic));
                self.slots.len() - 1
            }
        };
        self.used += 1;

        let id = PictureId(index);
        self.slide_window(id);
        self.release_if_unused(id);
        Ok(id)
    }

    fn slide_window(&mut self, current: PictureId) {
        while self.reference_count() > self.num_ref_frames {
            let oldest = self
                .iter()
                .filter(|(id, pic)| *id != current && pic.is_short_term_reference())
                .min_by_key(|(_, pic)| pic.frame_num_wrap)
                .map(|(id, _)| id);
            let Some(oldest) = oldest else {
                warn!(
                    "H264: 参考帧超出上限但没有可移除的短期参考, refs={}, num_ref_frames={}",
                    self.reference_count(),
                    self.num_ref_frames
                );
                break;
            };
            if let Some(pic) = self.picture_mut(oldest) {
                debug!(
                    "H264: 滑动窗口移除参考, frame_num={}, frame_num_wrap={}",
                    pic.frame_num(),
                    pic.frame_num_wrap
                );
                pic.mark_unused_for_reference();
            }
            self.release_if_unused(oldest);
        }
    }

    /// 按 PicNum 查找短期参考
    pub fn get_picture(&self, pic_num: i32) -> Option<PictureId> {
        self.find_short_term(pic_num).map(|(id, _)| id)
    }

    /// 按 LongTermPicNum 查找长期参考
    pub fn get_picture_by_ltpn(&self, long_term_pic_num: i32) -> Option<PictureId> {
        self.find_long_term(long_term_pic_num).map(|(id, _)| id)
    }

    /// 按 LongTermFrameIdx 查找长期参考
    pub fn get_picture_by_ltidx(&self, long_term_frame_idx: u32) -> Option<PictureId> {
        self.iter()
            .find(|(_, pic)| {
                pic.is_long_term_reference() && pic.long_term_frame_idx == long_term_frame_idx
            })
            .map(|(id, _)| id)
    }

    /// 匹配的图像与命中的奇偶性
    fn find_short_term(&self, pic_num: i32) -> Option<(PictureId, [bool; 2])> {
        self.iter().find_map(|(id, pic)| {
            if !pic.is_short_term_reference() {
                return None;
            }
            let hit = [0, 1].map(|p| pic.parity_is_reference(p) && pic.pic_num[p] == pic_num);
            (hit[0] || hit[1]).then_some((id, hit))
        })
    }

    fn find_long_term(&self, long_term_pic_num: i32) -> Option<(PictureId, [bool; 2])> {
        self.iter().find_map(|(id, pic)| {
            if !pic.is_long_term_reference() {
                return None;
            }
            let hit = [0, 1].map(|p| {
                pic.parity_is_reference(p) && pic.long_term_pic_num[p] == long_term_pic_num
            });
            (hit[0] || hit[1]).then_some((id, hit))
        })
    }

    /// MMCO 1: 按 PicNum 清除短期参考
    pub fn set_unused_ref_picture(&mut self, pic_num: i32) -> HwdecResult<()> {
        let (id, hit) = self.find_short_term(pic_num).ok_or_else(|| {
            HwdecError::ReferenceInconsistency(format!("H264: 未找到短期参考, pic_num={pic_num}"))
        })?;
        self.clear_reference(id, hit);
        Ok(())
    }

    /// MMCO 2: 按 LongTermPicNum 清除长期参考
    pub fn set_unused_ref_picture_byltpn(&mut self, long_term_pic_num: i32) -> HwdecResult<()> {
        let (id, hit) = self.find_long_term(long_term_pic_num).ok_or_else(|| {
            HwdecError::ReferenceInconsistency(format!(
                "H264: 未找到长期参考, long_term_pic_num={long_term_pic_num}"
            ))
        })?;
        self.clear_reference(id, hit);
        Ok(())
    }

    /// 按 LongTermFrameIdx 清除长期参考
    pub fn set_unused_ref_picture_bylidx(&mut self, long_term_frame_idx: u32) -> HwdecResult<()> {
        let id = self.get_picture_by_ltidx(long_term_frame_idx).ok_or_else(|| {
            HwdecError::ReferenceInconsistency(format!(
                "H264: 未找到长期参考, long_term_frame_idx={long_term_frame_idx}"
            ))
        })?;
        self.clear_reference(id, [true, true]);
        Ok(())
    }

    /// MMCO 4: 清除 LongTermFrameIdx 不小于 `max_long_term_frame_idx_plus1` 的长期参考
    ///
    /// 返回被清除的图像数.
    pub fn set_unused_ref_picture_lidx_gt(&mut self, max_long_term_frame_idx_plus1: u32) -> usize {
        let targets: Vec<PictureId> = self
            .iter()
            .filter(|(_, pic)| {
                pic.is_long_term_reference()
                    && pic.long_term_frame_idx >= max_long_term_frame_idx_plus1
            })
            .map(|(id, _)| id)
            .collect();
        for &id in &targets {
            self.clear_reference(id, [true, true]);
        }
        targets.len()
    }

    /// 将图像标记为长期参考, 已占用同一 LongTermFrameIdx 的其他图像被清除
    pub fn mark_long_term(&mut self, id: PictureId, long_term_frame_idx: u32) -> HwdecResult<()> {
        if self.picture(id).is_none() {
            return Err(HwdecError::InvalidArgument(format!(
                "H264: 图像不在 DPB 中, id={}",
                id.0
            )));
        }
        let occupied = self
            .get_picture_by_ltidx(long_term_frame_idx)
            .filter(|&other| other != id);
        if let Some(other) = occupied {
            self.clear_reference(other, [true, true]);
        }
        if let Some(pic) = self.picture_mut(id) {
            pic.mark_long_term(long_term_frame_idx);
        }
        Ok(())
    }

    fn clear_reference(&mut self, id: PictureId, parities: [bool; 2]) {
        let Some(pic) = self.picture_mut(id) else {
            return;
        };
        if parities[0] {
            pic.top_is_reference = false;
        }
        if parities[1] {
            pic.bottom_is_reference = false;
        }
        if !pic.is_reference() {
            pic.mark_unused_for_reference();
        }
        self.release_if_unused(id);
    }

    /// 下一个应输出的图像
    ///
    /// 在等待输出的图像中选择 (顶场 POC, 底场 POC) 最小者; POC 已复位 (≤ 0)
    /// 的 IDR 图像优先于其他图像. 未设置 `do_flush` 时, 只有 DPB 占满才返回.
    pub fn get_next_out_picture(&self, do_flush: bool) -> Option<PictureId> {
        if !do_flush && self.used < self.size {
            return None;
        }
        self.iter()
            .filter(|(_, pic)| pic.delayed_output)
            .min_by_key(|(_, pic)| {
                let [top, bottom] = pic.field_order_cnt();
                let fresh_idr = pic.is_idr() && pic.poc() <= 0;
                (!fresh_idr, top, bottom)
            })
            .map(|(id, _)| id)
    }

    /// 图像已交给输出管线
    pub fn set_output_picture(&mut self, id: PictureId) -> HwdecResult<()> {
        let pic = self.picture_mut(id).ok_or_else(|| {
            HwdecError::InvalidArgument(format!("H264: 图像不在 DPB 中, id={}", id.0))
        })?;
        pic.delayed_output = false;
        self.release_if_unused(id);
        Ok(())
    }

    /// 放弃全部等待输出的图像 (no_output_of_prior_pics_flag)
    pub fn discard_pending_output(&mut self) {
        let pending: Vec<PictureId> = self
            .iter()
            .filter(|(_, pic)| pic.delayed_output)
            .map(|(id, _)| id)
            .collect();
        for id in pending {
            if let Some(pic) = self.picture_mut(id) {
                pic.delayed_output = false;
            }
            self.release_if_unused(id);
        }
    }

    /// 无条件移除并释放图像
    pub fn remove_picture(&mut self, id: PictureId) -> HwdecResult<()> {
        let pic = self
            .slots
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or_else(|| {
                HwdecError::InvalidArgument(format!("H264: 图像不在 DPB 中, id={}", id.0))
            })?;
        self.used -= 1;
        pic.frame.free();
        Ok(())
    }

    /// 清除全部参考标记, 等待输出的图像保留
    pub fn flush(&mut self) {
        let ids: Vec<PictureId> = self.iter().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(pic) = self.picture_mut(id) {
                pic.mark_unused_for_reference();
            }
            self.release_if_unused(id);
        }
    }

    /// 释放全部图像
    pub fn free_all(&mut self) {
        for pic in self.slots.drain(..).flatten() {
            pic.frame.free();
        }
        self.used = 0;
    }

    fn release_if_unused(&mut self, id: PictureId) {
        let unused = self
            .picture(id)
            .is_some_and(|pic| !pic.is_reference() && !pic.delayed_output);
        if unused {
            self.unlock(id);
        }
    }

    fn unlock(&mut self, id: PictureId) {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return;
        };
        let Some(pic) = slot.as_mut() else {
            return;
        };
        pic.lock_counter = pic.lock_counter.saturating_sub(1);
        if pic.lock_counter > 0 {
            return;
        }
        if let Some(pic) = slot.take() {
            self.used -= 1;
            pic.frame.free();
        }
    }
}

impl<F: FrameHandle> Drop for Dpb<F> {
    fn drop(&mut self) {
        self.free_all();
    }
}
