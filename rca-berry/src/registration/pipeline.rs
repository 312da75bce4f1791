//! 按参考的注册-传播管线.
//!
//! 每个参考独立走完 {载入 → 刚性注册 → (可选) 形变注册 →
//! 标签传播} 的阶段序列, 任一阶段失败即终止该参考并报告失败
//! 阶段, 不影响其他参考.

use std::fmt;

use super::{EngineError, RegistrationEngine, StageSpec};
use crate::data::{LabelVolume, ScanVolume};
use crate::dataset::AtlasEntry;
use crate::metrics::MetricError;

/// 单个参考处理失败的具体阶段与原因.
#[derive(Debug)]
pub enum RefErrorKind {
    /// 载入参考图像/分割失败.
    Load(nifti::NiftiError),

    /// 注册阶段失败 (刚性或形变).
    Register(EngineError),

    /// 变换传播到分割失败.
    Propagate(EngineError),

    /// 指标聚合失败 (形状不符, 标签缺失等).
    Metrics(MetricError),
}

impl RefErrorKind {
    /// 失败阶段名, 用于简短诊断.
    pub fn stage(&self) -> &'static str {
        match self {
            RefErrorKind::Load(_) => "load",
            RefErrorKind::Register(_) => "register",
            RefErrorKind::Propagate(_) => "propagate",
            RefErrorKind::Metrics(_) => "metrics",
        }
    }
}

/// 单个参考处理失败. 携带参考名以便诊断定位.
#[derive(Debug)]
pub struct RefError {
    /// 失败的参考名.
    pub atlas: String,

    /// 失败阶段与原因.
    pub kind: RefErrorKind,
}

impl fmt::Display for RefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cause: &dyn fmt::Display = match &self.kind {
            RefErrorKind::Load(e) => e,
            RefErrorKind::Register(e) | RefErrorKind::Propagate(e) => e,
            RefErrorKind::Metrics(e) => e,
        };
        write!(f, "reference `{}` ({}): {cause}", self.atlas, self.kind.stage())
    }
}

impl std::error::Error for RefError {}

/// 把一个参考注册到受测图像并传播其分割的管线.
///
/// 管线只借用共享的只读输入 (受测图像与阶段配置),
/// 因此可以在多个工作线程上对不同参考并行调用.
pub struct RefPipeline<'a, E: RegistrationEngine> {
    engine: &'a E,
    subject_scan: &'a ScanVolume,
    stages: Vec<StageSpec>,
}

impl<'a, E: RegistrationEngine> RefPipeline<'a, E> {
    /// 创建管线. `both_stages` 控制是否在刚性之后接续形变阶段.
    pub fn new(engine: &'a E, subject_scan: &'a ScanVolume, both_stages: bool) -> Self {
        Self {
            engine,
            subject_scan,
            stages: StageSpec::two_stage(both_stages),
        }
    }

    /// 以显式阶段序列创建管线. `stages` 为空时 panic.
    pub fn with_stages(engine: &'a E, subject_scan: &'a ScanVolume, stages: Vec<StageSpec>) -> Self {
        assert!(!stages.is_empty(), "管线至少需要一个注册阶段");
        Self {
            engine,
            subject_scan,
            stages,
        }
    }

    /// 阶段配置.
    #[inline]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// 将 `entry` 的分割传播到受测图像空间.
    ///
    /// 变换链在本次调用内产生并消费 (恰好一次), 不对外暴露.
    pub fn propagate(&self, entry: &AtlasEntry) -> Result<LabelVolume, RefError> {
        let fail = |kind| RefError {
            atlas: entry.name.clone(),
            kind,
        };

        let pair = entry.open().map_err(|e| fail(RefErrorKind::Load(e)))?;

        log::debug!("registering reference `{}` ({} stage(s))", entry.name, self.stages.len());
        let (_warped, chain) = self
            .engine
            .register(self.subject_scan, &pair.scan, &self.stages)
            .map_err(|e| fail(RefErrorKind::Register(e)))?;

        self.engine
            .resample_label(&chain, &pair.seg)
            .map_err(|e| fail(RefErrorKind::Propagate(e)))
    }
}
