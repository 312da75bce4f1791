//! 通用常量.

/// 分割标签值.
pub mod labels {
    /// 各数据集约定中, 背景的标签值.
    pub const BACKGROUND: u8 = 0;

    /// 左心室腔 (LV cavity) 的标签值.
    pub const LV_CAVITY: u8 = 1;

    /// 左心室心肌 (LV myocardium) 的标签值.
    pub const LV_MYOCARDIUM: u8 = 2;

    /// 右心室腔 (RV cavity) 的标签值. Atlas/参考分割约定.
    pub const RV_CAVITY: u8 = 4;

    /// 右心室腔 (RV cavity) 的标签值. 5k Biobank 分割约定.
    pub const RV_CAVITY_5K: u8 = 3;

    /// 标签是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BACKGROUND)
    }

    /// 标签是否是前景 (任意非背景结构)?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        !is_background(p)
    }
}

/// 参考 (atlas) 分割约定的类别序列. 顺序即指标向量的输出顺序.
pub const ATLAS_CLASSES: [u8; 4] = [
    labels::BACKGROUND,
    labels::LV_CAVITY,
    labels::LV_MYOCARDIUM,
    labels::RV_CAVITY,
];

/// 5k Biobank 分割约定的类别序列. 顺序即指标向量的输出顺序.
pub const BIOBANK_5K_CLASSES: [u8; 4] = [
    labels::BACKGROUND,
    labels::LV_CAVITY,
    labels::LV_MYOCARDIUM,
    labels::RV_CAVITY_5K,
];

/// 一次扫描默认最多注册的参考个数.
pub const DEFAULT_MAX_REFERENCES: usize = 100;
