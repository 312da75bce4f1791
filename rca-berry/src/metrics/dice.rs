//! Dice 相似系数 (DSC).

use ndarray::ArrayView3;

/// 计算两个同形状二值掩码的 Dice 系数 `2|A∩B| / (|A| + |B|)`.
///
/// 两掩码形状不符时 panic.
///
/// # 0/0 约定
///
/// 两掩码均为空时返回 `1.0`: 两个空区域视为完全一致.
/// 该约定使 "双方都没有该结构" 不会被误判为最差匹配.
pub fn dice(a: ArrayView3<'_, bool>, b: ArrayView3<'_, bool>) -> f64 {
    assert_eq!(a.dim(), b.dim(), "Dice 输入形状不符");

    let mut intersection = 0u64;
    let mut total = 0u64;
    for (x, y) in a.iter().zip(b.iter()) {
        intersection += (*x && *y) as u64;
        total += *x as u64 + *y as u64;
    }

    if total == 0 {
        return 1.0;
    }
    2.0 * intersection as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::dice;
    use ndarray::Array3;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    /// 非空掩码与自身的 Dice 恒为 1.
    #[test]
    fn test_dice_self() {
        let mut m = Array3::<bool>::from_elem((4, 4, 4), false);
        m[(1, 1, 1)] = true;
        m[(2, 3, 0)] = true;
        assert!(f64_eq(dice(m.view(), m.view()), 1.0));
    }

    /// 两个不相交非空掩码的 Dice 为 0.
    #[test]
    fn test_dice_disjoint() {
        let mut a = Array3::<bool>::from_elem((4, 4, 4), false);
        let mut b = a.clone();
        a[(0, 0, 0)] = true;
        b[(3, 3, 3)] = true;
        assert!(f64_eq(dice(a.view(), b.view()), 0.0));
    }

    /// 0/0 约定: 两空掩码视为一致.
    #[test]
    fn test_dice_both_empty() {
        let a = Array3::<bool>::from_elem((2, 2, 2), false);
        assert!(f64_eq(dice(a.view(), a.view()), 1.0));
    }

    /// 部分重叠的常规取值.
    #[test]
    fn test_dice_partial() {
        let mut a = Array3::<bool>::from_elem((1, 1, 4), false);
        let mut b = a.clone();
        // A = {0, 1}, B = {1, 2}; 2*1 / (2+2) = 0.5
        a[(0, 0, 0)] = true;
        a[(0, 0, 1)] = true;
        b[(0, 0, 1)] = true;
        b[(0, 0, 2)] = true;
        assert!(f64_eq(dice(a.view(), b.view()), 0.5));
    }
}
