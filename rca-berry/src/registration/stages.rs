//! 注册阶段的引擎无关描述.

/// 阶段使用的变换族.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformKind {
    /// 全局相似变换 (平移 + 旋转 + 等比缩放).
    Similarity,

    /// B 样条自由形变.
    BSpline {
        /// 最终控制网格间距, 单位 mm.
        final_grid_mm: f64,

        /// 逐分辨率的网格间距倍率 (从粗到细).
        grid_schedule: Vec<f64>,
    },
}

/// 驱动优化的相似性度量.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    /// Mattes 互信息. 对跨对象强度差异稳健, 两阶段的默认度量.
    MattesMutualInformation,

    /// 均方差. 仅适用于强度直接可比的同模态场景.
    MeanSquares,
}

/// 一个注册阶段的完整配置.
///
/// 该结构完全透明; 引擎实现负责翻译成自己的参数格式.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    /// 变换族.
    pub transform: TransformKind,

    /// 相似性度量.
    pub measure: Measure,

    /// 多分辨率层数.
    pub resolutions: u32,

    /// 逐分辨率的图像金字塔降采样因子, 按文件轴序 `(x, y, z)`.
    /// `None` 时由引擎按 `resolutions` 取默认值.
    pub pyramid_schedule: Option<Vec<[u32; 3]>>,

    /// 每次迭代的空间采样点数.
    pub spatial_samples: u32,

    /// 每层分辨率的最大迭代次数.
    pub iterations: u32,

    /// 是否以质心对齐初始化变换.
    pub cog_init: bool,
}

impl StageSpec {
    /// 刚性阶段: 质心初始化的相似变换, 互信息度量, 四层分辨率.
    pub fn rigid() -> Self {
        Self {
            transform: TransformKind::Similarity,
            measure: Measure::MattesMutualInformation,
            resolutions: 4,
            pyramid_schedule: None,
            spatial_samples: 2048,
            iterations: 256,
            cog_init: true,
        }
    }

    /// 形变阶段: 16mm B 样条网格 (倍率 4.0/2.0), 互信息度量,
    /// 两层分辨率, 平滑金字塔 `4 4 2 / 2 2 2`.
    pub fn deformable() -> Self {
        Self {
            transform: TransformKind::BSpline {
                final_grid_mm: 16.0,
                grid_schedule: vec![4.0, 2.0],
            },
            measure: Measure::MattesMutualInformation,
            resolutions: 2,
            pyramid_schedule: Some(vec![[4, 4, 2], [2, 2, 2]]),
            spatial_samples: 1024,
            iterations: 256,
            cog_init: false,
        }
    }

    /// 标准两阶段配置: 刚性, 以及可选的形变接续.
    pub fn two_stage(both: bool) -> Vec<Self> {
        if both {
            vec![Self::rigid(), Self::deformable()]
        } else {
            vec![Self::rigid()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 两阶段开关控制变换链长度.
    #[test]
    fn test_two_stage_lengths() {
        assert_eq!(StageSpec::two_stage(false).len(), 1);

        let both = StageSpec::two_stage(true);
        assert_eq!(both.len(), 2);
        assert_eq!(both[0].transform, TransformKind::Similarity);
        assert!(matches!(both[1].transform, TransformKind::BSpline { .. }));
        assert_eq!(both[1].resolutions, 2);
    }
}
