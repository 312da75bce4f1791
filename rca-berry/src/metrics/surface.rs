//! 表面距离采样.
//!
//! 从两个二值掩码各自提取形态学边界, 对边界的补集做物理距离变换,
//! 再在对方边界处交叉采样并拼接. 该采样即标准的对称表面距离分布,
//! 均值/均方根/最大值分别给出 MSD, RMS 与 Hausdorff 距离.

use ndarray::{Array3, ArrayView3, Axis};

/// 距离变换中代表 "尚无特征点" 的有限大数.
///
/// 参与抛物线求交算术的初值必须有限, 避免 `INF - INF` 的 NaN;
/// 下包络分界点哨兵只参与比较, 用真正的无穷.
const FAR: f64 = 1e20;

/// 提取二值掩码的形态学边界: 掩码减去其 6-邻域 (面相邻) 腐蚀.
///
/// 数组边缘之外视为背景, 因此贴边的前景体素也属于边界.
pub fn boundary(mask: ArrayView3<'_, bool>) -> Array3<bool> {
    let (nz, nh, nw) = mask.dim();
    Array3::from_shape_fn((nz, nh, nw), |(z, h, w)| {
        if !mask[(z, h, w)] {
            return false;
        }
        z == 0
            || !mask[(z - 1, h, w)]
            || z + 1 == nz
            || !mask[(z + 1, h, w)]
            || h == 0
            || !mask[(z, h - 1, w)]
            || h + 1 == nh
            || !mask[(z, h + 1, w)]
            || w == 0
            || !mask[(z, h, w - 1)]
            || w + 1 == nw
            || !mask[(z, h, w + 1)]
    })
}

/// 一维平方距离变换 (Felzenszwalb-Huttenlocher 抛物线下包络法).
///
/// `f` 为输入平方距离, `step` 为该轴上相邻采样点的物理间距.
/// 结果写入 `d`. `v`, `zb` 为调用方复用的工作区.
fn dt1d(f: &[f64], d: &mut [f64], v: &mut [usize], zb: &mut [f64], step: f64) {
    let n = f.len();
    debug_assert!(n > 0);

    let x = |i: usize| i as f64 * step;

    let mut k = 0usize;
    v[0] = 0;
    zb[0] = f64::NEG_INFINITY;
    zb[1] = f64::INFINITY;

    for q in 1..n {
        loop {
            let p = v[k];
            // 抛物线 q 与抛物线 p 的交点横坐标.
            let s = ((f[q] + x(q) * x(q)) - (f[p] + x(p) * x(p))) / (2.0 * (x(q) - x(p)));
            if s <= zb[k] {
                // 抛物线 p 被完全遮蔽, 回退.
                debug_assert!(k > 0);
                k -= 1;
            } else {
                k += 1;
                v[k] = q;
                zb[k] = s;
                zb[k + 1] = f64::INFINITY;
                break;
            }
        }
    }

    k = 0;
    for q in 0..n {
        while zb[k + 1] < x(q) {
            k += 1;
        }
        let dx = x(q) - x(v[k]);
        d[q] = dx * dx + f[v[k]];
    }
}

/// 沿 `axis` 方向对平方距离场做一遍一维距离变换.
fn dt_axis(sq: &mut Array3<f64>, axis: Axis, step: f64) {
    let n = sq.len_of(axis);
    let mut f = vec![0.0; n];
    let mut d = vec![0.0; n];
    let mut v = vec![0usize; n];
    let mut zb = vec![0.0; n + 1];

    for mut lane in sq.lanes_mut(axis) {
        for (slot, val) in f.iter_mut().zip(lane.iter()) {
            *slot = *val;
        }
        dt1d(&f, &mut d, &mut v, &mut zb, step);
        for (val, slot) in d.iter().zip(lane.iter_mut()) {
            *slot = *val;
        }
    }
}

/// 计算到特征点集 (此处为边界体素) 的精确欧氏距离场, 单位 mm.
///
/// `pix_dim` 为 `[z_mm, h_mm, w_mm]`. 特征集为空时结果无意义,
/// 调用方必须事先排除 (见 [`surface_distances`]).
fn edt(feature: &Array3<bool>, pix_dim: [f64; 3]) -> Array3<f64> {
    let mut sq = feature.mapv(|on| if on { 0.0 } else { FAR });
    dt_axis(&mut sq, Axis(0), pix_dim[0]);
    dt_axis(&mut sq, Axis(1), pix_dim[1]);
    dt_axis(&mut sq, Axis(2), pix_dim[2]);
    sq.mapv_into(f64::sqrt)
}

/// 计算两个同形状二值掩码之间的对称表面距离采样, 单位 mm.
///
/// 返回 "A 边界距离场在 B 边界处的采样" 与 "B 边界距离场在 A
/// 边界处的采样" 的拼接. 交换两输入只改变采样顺序, 不改变取值多重集.
///
/// 两掩码形状不符时 panic.
///
/// # 边界退化
///
/// 任一掩码为空 (或腐蚀后不存在边界) 时返回空采样,
/// 不会对全假的边界图做距离变换. 调用方应将空采样视为该参考的
/// 错误条件, 而不是有效的距离分布.
pub fn surface_distances(
    a: ArrayView3<'_, bool>,
    b: ArrayView3<'_, bool>,
    pix_dim: [f64; 3],
) -> Vec<f64> {
    assert_eq!(a.dim(), b.dim(), "表面距离输入形状不符");

    let border_a = boundary(a);
    let border_b = boundary(b);

    let len_a = border_a.iter().filter(|on| **on).count();
    let len_b = border_b.iter().filter(|on| **on).count();
    if len_a == 0 || len_b == 0 {
        return vec![];
    }

    let dist_a = edt(&border_a, pix_dim);
    let dist_b = edt(&border_b, pix_dim);

    let mut sds = Vec::with_capacity(len_a + len_b);
    sds.extend(
        border_b
            .indexed_iter()
            .filter(|(_, on)| **on)
            .map(|(idx, _)| dist_a[idx]),
    );
    sds.extend(
        border_a
            .indexed_iter()
            .filter(|(_, on)| **on)
            .map(|(idx, _)| dist_b[idx]),
    );
    sds
}

/// 表面距离采样的均值 (MSD). 空采样时返回 NaN.
pub fn mean_sd(sample: &[f64]) -> f64 {
    sample.iter().sum::<f64>() / sample.len() as f64
}

/// 表面距离采样的均方根 (RMS). 空采样时返回 NaN.
pub fn rms_sd(sample: &[f64]) -> f64 {
    (sample.iter().map(|d| d * d).sum::<f64>() / sample.len() as f64).sqrt()
}

/// 表面距离采样的最大值 (Hausdorff 距离). 空采样时返回 NaN.
pub fn hausdorff(sample: &[f64]) -> f64 {
    sample.iter().copied().fold(f64::NAN, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    const ISO: [f64; 3] = [1.0, 1.0, 1.0];

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// 以 `center` 为球心, `radius` (体素) 为半径的实心球掩码.
    fn sphere(shape: (usize, usize, usize), center: (f64, f64, f64), radius: f64) -> Array3<bool> {
        Array3::from_shape_fn(shape, |(z, h, w)| {
            let dz = z as f64 - center.0;
            let dh = h as f64 - center.1;
            let dw = w as f64 - center.2;
            (dz * dz + dh * dh + dw * dw).sqrt() <= radius
        })
    }

    /// 实心掩码的边界: 单体素掩码整体就是边界.
    #[test]
    fn test_boundary_single_voxel() {
        let mut m = Array3::<bool>::from_elem((3, 3, 3), false);
        m[(1, 1, 1)] = true;
        let b = boundary(m.view());
        assert_eq!(b.iter().filter(|on| **on).count(), 1);
        assert!(b[(1, 1, 1)]);
    }

    /// 3x3x3 全前景时内部被腐蚀, 边界为 26 个外壳体素; 贴边前景算边界.
    #[test]
    fn test_boundary_full_cube() {
        let m = Array3::<bool>::from_elem((3, 3, 3), true);
        let b = boundary(m.view());
        assert!(!b[(1, 1, 1)]);
        assert_eq!(b.iter().filter(|on| **on).count(), 26);
    }

    /// 相同掩码的所有表面距离为 0, 故 MSD = RMS = HD = 0.
    #[test]
    fn test_identical_masks_zero() {
        let m = sphere((10, 10, 10), (5.0, 5.0, 5.0), 3.0);
        let sds = surface_distances(m.view(), m.view(), ISO);
        assert!(!sds.is_empty());
        assert!(sds.iter().all(|d| *d == 0.0));
        assert!(f64_eq(mean_sd(&sds), 0.0));
        assert!(f64_eq(rms_sd(&sds), 0.0));
        assert!(f64_eq(hausdorff(&sds), 0.0));
    }

    /// 交换两输入不改变距离多重集.
    #[test]
    fn test_swap_symmetry() {
        let a = sphere((12, 12, 12), (6.0, 6.0, 6.0), 3.0);
        let b = sphere((12, 12, 12), (6.0, 7.0, 6.0), 2.0);

        let mut ab = surface_distances(a.view(), b.view(), ISO);
        let mut ba = surface_distances(b.view(), a.view(), ISO);
        ab.sort_by(f64::total_cmp);
        ba.sort_by(f64::total_cmp);
        assert_eq!(ab, ba);
    }

    /// 单体素掩码错开一格: 全部距离等于物理间距.
    #[test]
    fn test_single_voxel_offset() {
        let mut a = Array3::<bool>::from_elem((5, 5, 5), false);
        let mut b = a.clone();
        a[(2, 2, 2)] = true;
        b[(3, 2, 2)] = true;

        // z 方向分辨率 2mm: 错开一格即 2mm.
        let sds = surface_distances(a.view(), b.view(), [2.0, 1.0, 1.0]);
        assert_eq!(sds.len(), 2);
        assert!(sds.iter().all(|d| f64_eq(*d, 2.0)));
    }

    /// 错开一体素的球: Hausdorff 等于错开的物理距离.
    #[test]
    fn test_sphere_offset_hausdorff() {
        let a = sphere((10, 10, 10), (4.0, 4.0, 4.0), 2.5);
        let b = sphere((10, 10, 10), (4.0, 4.0, 5.0), 2.5);
        let sds = surface_distances(a.view(), b.view(), ISO);
        assert!(f64_eq(hausdorff(&sds), 1.0));
        assert!(mean_sd(&sds) < 1.0);
    }

    /// 空掩码没有边界, 返回空采样而不是退化距离场.
    #[test]
    fn test_empty_mask_sentinel() {
        let empty = Array3::<bool>::from_elem((4, 4, 4), false);
        let mut solid = empty.clone();
        solid[(1, 1, 1)] = true;

        assert!(surface_distances(empty.view(), solid.view(), ISO).is_empty());
        assert!(surface_distances(solid.view(), empty.view(), ISO).is_empty());
        assert!(hausdorff(&[]).is_nan());
        assert!(mean_sd(&[]).is_nan());
    }
}
