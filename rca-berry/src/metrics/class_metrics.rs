//! 按类别映射聚合的分割比较指标.

use std::fmt;

use super::{dice, hausdorff, mean_sd, rms_sd, surface_distances};
use crate::data::{LabelVolume, NiftiGeom};
use crate::Idx3d;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 受测分割与参考分割的类别映射.
///
/// 同一解剖结构在两套分割约定下可能使用不同的整数标签
/// (如右心室腔在 5k Biobank 中为 3, 在 atlas 约定中为 4).
/// 映射的顺序即指标向量的输出顺序.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClassMapping {
    pairs: Vec<(u8, u8)>,
}

impl ClassMapping {
    /// 由受测分割标签序列和参考分割标签序列配对构造映射.
    ///
    /// 两序列长度必须相等且非空, 否则返回 `None`.
    pub fn new(subject: &[u8], reference: &[u8]) -> Option<Self> {
        if subject.is_empty() || subject.len() != reference.len() {
            return None;
        }
        Some(Self {
            pairs: subject.iter().copied().zip(reference.iter().copied()).collect(),
        })
    }

    /// 两侧使用同一标签约定的恒等映射. `classes` 为空时返回 `None`.
    ///
    /// 真值分割与受测分割出自同一约定, 直接比较时用此映射.
    #[inline]
    pub fn identity(classes: &[u8]) -> Option<Self> {
        Self::new(classes, classes)
    }

    /// 映射的类别对个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// 映射是否为空. 按构造不变式恒为 `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// 按序迭代 `(受测标签, 参考标签)` 对.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.pairs.iter().copied()
    }
}

/// 指示错误发生在哪一侧输入.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// 受测 (subject) 分割.
    Subject,

    /// 候选 (传播后的参考, 或真值) 分割.
    Candidate,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Subject => write!(f, "subject"),
            Side::Candidate => write!(f, "candidate"),
        }
    }
}

/// 指标聚合的运行时错误.
///
/// 任一错误都意味着该候选分割不可用于排名, 调用方应跳过该参考,
/// 而不是带着零值/NaN 指标继续.
#[derive(Debug, Clone)]
pub enum MetricError {
    /// 两输入体数据形状不符.
    ShapeMismatch {
        /// 受测分割形状.
        subject: Idx3d,

        /// 候选分割形状.
        candidate: Idx3d,
    },

    /// 两输入体素分辨率不符, 物理距离无意义.
    SpacingMismatch,

    /// 映射中的标签未出现在对应体数据中.
    LabelAbsent {
        /// 缺失的标签值.
        label: u8,

        /// 缺失侧.
        side: Side,
    },
}

impl fmt::Display for MetricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricError::ShapeMismatch { subject, candidate } => {
                write!(f, "shape mismatch: subject {subject:?} vs candidate {candidate:?}")
            }
            MetricError::SpacingMismatch => write!(f, "voxel spacing mismatch"),
            MetricError::LabelAbsent { label, side } => {
                write!(f, "label {label} absent from {side} volume")
            }
        }
    }
}

impl std::error::Error for MetricError {}

/// 一个候选分割相对受测分割的完整指标向量.
///
/// 四个序列等长, 长度恒为 `映射类别数 + 1`: 前面每类一项,
/// 末项为二值化 "任意前景" 的整体比较, 也是排名最常用的汇总分量.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MetricVector {
    /// 各类别的 Dice 系数.
    pub dice: Vec<f64>,

    /// 各类别的平均表面距离 (mm).
    pub mean_sd: Vec<f64>,

    /// 各类别的均方根表面距离 (mm).
    pub rms_sd: Vec<f64>,

    /// 各类别的最大表面距离 (Hausdorff, mm).
    pub hausdorff: Vec<f64>,
}

impl MetricVector {
    /// 序列长度 (类别数 + 1).
    #[inline]
    pub fn len(&self) -> usize {
        self.dice.len()
    }

    /// 恒为 `false`; 为满足 clippy 的 `len` 习惯而提供.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dice.is_empty()
    }

    /// 整体前景 Dice, 即末项.
    #[inline]
    pub fn foreground_dice(&self) -> f64 {
        *self.dice.last().unwrap()
    }

    /// 整体前景平均表面距离, 即末项.
    #[inline]
    pub fn foreground_mean_sd(&self) -> f64 {
        *self.mean_sd.last().unwrap()
    }

    /// 整体前景均方根表面距离, 即末项.
    #[inline]
    pub fn foreground_rms_sd(&self) -> f64 {
        *self.rms_sd.last().unwrap()
    }

    /// 整体前景 Hausdorff 距离, 即末项.
    #[inline]
    pub fn foreground_hausdorff(&self) -> f64 {
        *self.hausdorff.last().unwrap()
    }
}

/// 计算候选分割 (传播后的参考分割或真值分割) 相对受测分割的指标向量.
///
/// 对映射中每一对类别: 两侧各按自身标签二值化, 计算 Dice
/// 与表面距离采样, 取均值/均方根/最大值; 最后追加一项二值化
/// "任意前景" 的整体比较. 表面距离以受测分割的体素分辨率换算为 mm.
///
/// # 错误
///
/// 形状或分辨率不符, 或映射中的标签未出现在对应体数据中时返回
/// `Err`. 后者覆盖了注册把小结构完全挤出视野的退化情形,
/// 这类候选不应进入排名.
pub fn class_metrics(
    subject: &LabelVolume,
    candidate: &LabelVolume,
    mapping: &ClassMapping,
) -> Result<MetricVector, MetricError> {
    if subject.shape() != candidate.shape() {
        return Err(MetricError::ShapeMismatch {
            subject: subject.shape(),
            candidate: candidate.shape(),
        });
    }
    if !subject.same_grid(candidate) {
        return Err(MetricError::SpacingMismatch);
    }

    let subject_seen = subject.label_presence();
    let candidate_seen = candidate.label_presence();
    for (s_label, c_label) in mapping.iter() {
        if !subject_seen[s_label as usize] {
            return Err(MetricError::LabelAbsent {
                label: s_label,
                side: Side::Subject,
            });
        }
        if !candidate_seen[c_label as usize] {
            return Err(MetricError::LabelAbsent {
                label: c_label,
                side: Side::Candidate,
            });
        }
    }

    let pix_dim = subject.pix_dim();
    let slots = mapping.len() + 1;
    let mut out = MetricVector {
        dice: Vec::with_capacity(slots),
        mean_sd: Vec::with_capacity(slots),
        rms_sd: Vec::with_capacity(slots),
        hausdorff: Vec::with_capacity(slots),
    };

    let mut push_pair = |a: &ndarray::Array3<bool>, b: &ndarray::Array3<bool>| {
        let sds = surface_distances(a.view(), b.view(), pix_dim);
        out.dice.push(dice(a.view(), b.view()));
        out.mean_sd.push(mean_sd(&sds));
        out.rms_sd.push(rms_sd(&sds));
        out.hausdorff.push(hausdorff(&sds));
    };

    for (s_label, c_label) in mapping.iter() {
        push_pair(&subject.binarize(s_label), &candidate.binarize(c_label));
    }

    // 末项: 整体前景.
    push_pair(&subject.foreground_mask(), &candidate.foreground_mask());

    debug_assert_eq!(out.dice.len(), slots);
    Ok(out)
}
