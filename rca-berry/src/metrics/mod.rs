//! 分割比较指标.
//!
//! 叶子指标为 Dice 重叠率与表面距离采样; 其上由
//! [`class_metrics`] 按类别映射聚合为指标向量.

mod class_metrics;
mod dice;
mod surface;

pub use class_metrics::{class_metrics, ClassMapping, MetricError, MetricVector, Side};
pub use dice::dice;
pub use surface::{boundary, hausdorff, mean_sd, rms_sd, surface_distances};
