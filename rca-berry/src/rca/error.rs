//! 受测对象级错误.
//!
//! 单个参考的失败 ([`crate::registration::RefError`]) 在扫描内部
//! 被捕获并跳过; 这里的错误都会使该受测对象的本次运行失败,
//! 但不应中止整个批次.

use std::fmt;

use crate::config::LayoutError;
use crate::dataset::{StoreError, SubjectError};
use crate::metrics::MetricError;

/// 受测对象级致命错误.
#[derive(Debug)]
pub enum SweepError {
    /// 布局配置非法.
    Layout(LayoutError),

    /// 受测对象输入缺失或无法读取 (扫描开始前的配置性错误).
    Subject(SubjectError),

    /// 参考库缺失或为空 (扫描开始前的配置性错误).
    Store(StoreError),

    /// 所有参考都失败了, 没有任何可用的排名条目.
    AllReferencesFailed {
        /// 尝试过的参考个数.
        attempted: usize,
    },

    /// 真值直接比较失败 (参考循环之外的聚合错误).
    GroundTruth(MetricError),
}

impl fmt::Display for SweepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepError::Layout(e) => write!(f, "{e}"),
            SweepError::Subject(e) => write!(f, "{e}"),
            SweepError::Store(e) => write!(f, "{e}"),
            SweepError::AllReferencesFailed { attempted } => {
                write!(f, "all {attempted} references failed; nothing to rank")
            }
            SweepError::GroundTruth(e) => write!(f, "ground-truth comparison failed: {e}"),
        }
    }
}

impl std::error::Error for SweepError {}

impl From<LayoutError> for SweepError {
    fn from(value: LayoutError) -> Self {
        Self::Layout(value)
    }
}

impl From<SubjectError> for SweepError {
    fn from(value: SubjectError) -> Self {
        Self::Subject(value)
    }
}

impl From<StoreError> for SweepError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}
