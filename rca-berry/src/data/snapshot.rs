//! 体数据中间切片的 PNG 快照. 用于人工快速检查 (QC) 注册与传播结果.

use super::{LabelVolume, NiftiGeom, ScanVolume};
use image::{GrayImage, ImageResult, Luma};
use ndarray::Axis;
use std::path::Path;

/// 使标签更有利于单通道可视化. 背景为黑色, 其余标签拉开灰度差.
#[inline]
fn pretty(label: u8) -> u8 {
    match label {
        crate::consts::labels::BACKGROUND => 0,
        p => p.saturating_mul(60),
    }
}

impl LabelVolume {
    /// 将 z 方向中间切片保存为灰度 PNG.
    ///
    /// 标签值会映射到肉眼较易区分的灰度, 而不是按原样保存.
    pub fn save_midslice_png<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        let (z, height, width) = self.shape();
        let sli = self.slice_at(z / 2);

        let mut buf = GrayImage::new(width as u32, height as u32);
        for ((h, w), &pix) in sli.indexed_iter() {
            buf.put_pixel(w as u32, h as u32, Luma([pretty(pix)]));
        }
        buf.save(path)
    }
}

impl ScanVolume {
    /// 将 z 方向中间切片按 min-max 规范化保存为灰度 PNG.
    ///
    /// 非有限强度值按 0 处理.
    pub fn save_midslice_png<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        let (z, height, width) = self.shape();
        let sli = self.data().index_axis_move(Axis(0), z / 2);

        let finite = sli.iter().copied().filter(|v| v.is_finite());
        let min = finite.clone().fold(f32::INFINITY, f32::min);
        let max = finite.fold(f32::NEG_INFINITY, f32::max);
        let span = if max > min { max - min } else { 1.0 };

        let mut buf = GrayImage::new(width as u32, height as u32);
        for ((h, w), &pix) in sli.indexed_iter() {
            let v = if pix.is_finite() {
                ((pix - min) / span * 255.0) as u8
            } else {
                0
            };
            buf.put_pixel(w as u32, h as u32, Luma([v]));
        }
        buf.save(path)
    }
}
