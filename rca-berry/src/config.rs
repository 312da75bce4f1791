//! 受测对象目录布局的声明式配置.
//!
//! 旧式流程把文件名与类别表放在一段被 `exec` 的配置脚本里;
//! 这里换成纯数据记录, 载入时做校验, 绝不执行.

use std::fmt;
#[cfg(feature = "serde")]
use std::path::Path;

use crate::consts::{ATLAS_CLASSES, BIOBANK_5K_CLASSES};
use crate::metrics::ClassMapping;
use once_cell::sync::Lazy;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 配置载入/校验错误.
#[derive(Debug)]
pub enum LayoutError {
    /// 文件名字段为空.
    EmptyFilename(&'static str),

    /// 类别表为空或两侧长度不符.
    BadClassLists {
        /// 受测侧类别个数.
        subject: usize,

        /// 参考侧类别个数.
        reference: usize,
    },

    /// 读配置文件失败.
    Io(std::io::Error),

    /// 配置内容不是合法的 JSON 记录.
    #[cfg(feature = "serde")]
    Parse(serde_json::Error),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::EmptyFilename(field) => write!(f, "layout field `{field}` is empty"),
            LayoutError::BadClassLists { subject, reference } => {
                write!(f, "class lists invalid: {subject} subject vs {reference} reference")
            }
            LayoutError::Io(e) => write!(f, "layout read error: {e}"),
            #[cfg(feature = "serde")]
            LayoutError::Parse(e) => write!(f, "layout parse error: {e}"),
        }
    }
}

impl std::error::Error for LayoutError {}

impl From<std::io::Error> for LayoutError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// 一套数据约定下, 受测对象目录与参考 (atlas) 目录的文件布局及类别表.
///
/// 该结构完全透明. 字段在 [`SubjectLayout::validate`] 中统一校验.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SubjectLayout {
    /// 强度图像在目录内的文件名.
    pub image: String,

    /// 分割标注在目录内的文件名.
    pub seg: String,

    /// 地标文件在目录内的文件名. RCA 分析本身不消费, 仅为数据
    /// 约定的一部分.
    #[cfg_attr(feature = "serde", serde(default))]
    pub landmarks: Option<String>,

    /// 受测分割的类别标签序列. 顺序即指标向量的输出顺序.
    pub subject_classes: Vec<u8>,

    /// 参考分割的类别标签序列, 与 `subject_classes` 一一对应.
    pub reference_classes: Vec<u8>,
}

/// 5k Biobank 约定: 受测右心室腔为 3, 参考为 4.
static BIOBANK_5K: Lazy<SubjectLayout> = Lazy::new(|| SubjectLayout {
    image: "lvsa_ED.nii.gz".to_string(),
    seg: "segmentation_ED.nii.gz".to_string(),
    landmarks: Some("landmarks.vtk".to_string()),
    subject_classes: BIOBANK_5K_CLASSES.to_vec(),
    reference_classes: ATLAS_CLASSES.to_vec(),
});

/// Biobank/Atlas 约定: 两侧标签一致.
static BIOBANK: Lazy<SubjectLayout> = Lazy::new(|| SubjectLayout {
    image: "lvsa_ED.nii.gz".to_string(),
    seg: "segmentation_ED.nii.gz".to_string(),
    landmarks: Some("landmarks.vtk".to_string()),
    subject_classes: ATLAS_CLASSES.to_vec(),
    reference_classes: ATLAS_CLASSES.to_vec(),
});

impl SubjectLayout {
    /// 内置的 5k Biobank 布局.
    pub fn biobank_5k() -> Self {
        BIOBANK_5K.clone()
    }

    /// 内置的 Biobank/Atlas 布局.
    pub fn biobank() -> Self {
        BIOBANK.clone()
    }

    /// 按约定名查找内置布局. 未知名字返回 `None`.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "5kBIOBANK" => Some(Self::biobank_5k()),
            "BIOBANK" | "ATLAS" => Some(Self::biobank()),
            _ => None,
        }
    }

    /// 从 JSON 文件载入布局并校验.
    #[cfg(feature = "serde")]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LayoutError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let layout: Self = serde_json::from_str(&text).map_err(LayoutError::Parse)?;
        layout.validate()?;
        Ok(layout)
    }

    /// 校验布局记录: 文件名非空, 类别表非空且两侧等长.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.image.is_empty() {
            return Err(LayoutError::EmptyFilename("image"));
        }
        if self.seg.is_empty() {
            return Err(LayoutError::EmptyFilename("seg"));
        }
        if self.subject_classes.is_empty()
            || self.subject_classes.len() != self.reference_classes.len()
        {
            return Err(LayoutError::BadClassLists {
                subject: self.subject_classes.len(),
                reference: self.reference_classes.len(),
            });
        }
        Ok(())
    }

    /// 由类别表构造指标计算用的类别映射.
    ///
    /// 校验过的布局一定能构造成功.
    pub fn class_mapping(&self) -> Option<ClassMapping> {
        ClassMapping::new(&self.subject_classes, &self.reference_classes)
    }

    /// 真值直接比较用的恒等映射 (真值与受测分割同约定).
    pub fn ground_truth_mapping(&self) -> Option<ClassMapping> {
        ClassMapping::identity(&self.subject_classes)
    }
}
