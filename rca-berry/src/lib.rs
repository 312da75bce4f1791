#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 在没有真值分割的情况下, 用逆向分类精度 (RCA, Reverse
//! Classification Accuracy) 方法评估一份自动解剖分割的质量:
//! 把一批已知分割的参考 (atlas) 图像逐个注册到受测图像上,
//! 将参考分割传播到受测空间, 与受测自身的 (未验证) 分割比较得到
//! 代理质量分; 最佳匹配参考的分数即为质量预测.
//!
//! 该 crate 目前仅提供 `safe` 接口. 形变注册的数值求解由外部引擎
//! (elastix / transformix) 承担, 本库只负责边界协议与编排.
//!
//! # 注意
//!
//! 1. 体数据统一按 `(z, H, W)` 内存轴序访问 (从 nii 文件轴序
//!   `[W, H, z]` 置换而来).
//! 2. 所有表面距离以毫米计, 来自 header 的体素分辨率,
//!   绝不以体素下标计.
//! 3. 在非期望情况下 (形状不符的索引访问等), 程序会直接 panic,
//!   而不会导致内存错误. As what Rust promises.
//!
//! # 开发计划
//!
//! ### Dice 与表面距离叶子指标 ✅
//!
//! 边界提取 (6-邻域腐蚀), 各向异性精确欧氏距离变换,
//! 对称交叉采样. 实现位于 `rca-berry/src/metrics`.
//!
//! ### 按类别映射的指标聚合 ✅
//!
//! 每类 Dice/MSD/RMS/HD, 外加整体前景汇总槽位.
//! 实现位于 `rca-berry/src/metrics/class_metrics.rs`.
//!
//! ### 注册引擎边界与 elastix 驱动 ✅
//!
//! 相似变换 + B 样条两阶段, 互信息度量, 多分辨率金字塔;
//! 标签传播统一最近邻. 实现位于 `rca-berry/src/registration`.
//!
//! ### 参考库扫描与受测对象载入 ✅
//!
//! 实现位于 `rca-berry/src/dataset`.
//!
//! ### 扫描编排, 结果表与最优汇总 ✅
//!
//! 并行工作池展开, 单参考失败跳过, 逐指标最优与取得者.
//! 实现位于 `rca-berry/src/rca`.
//!
//! ### 占用标记与幂等重入 ✅
//!
//! 实现位于 `rca-berry/src/rca/claim.rs`.
//!
//! ### 结果持久化 (JSON / bincode) ✅
//!
//! 实现位于 `rca-berry/src/rca/result.rs`.

/// 三维索引, 按 `(z, H, W)` 轴序.
pub type Idx3d = (usize, usize, usize);

/// nii 格式 3D 体数据基础结构.
mod data;

pub use data::{synthetic_header, LabelVolume, NiftiGeom, ScanVolume, VolumePair};

pub mod config;
pub mod consts;
pub mod dataset;
pub mod metrics;
pub mod prelude;
pub mod rca;
pub mod registration;
