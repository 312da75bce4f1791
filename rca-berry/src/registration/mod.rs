//! 图像注册: 引擎边界、阶段描述与按参考的注册-传播管线.
//!
//! 形变注册的数值求解本身不在本 crate 内实现; 外部引擎被当作黑盒,
//! 通过 [`RegistrationEngine`] 边界调用: 给定固定图像、浮动图像与
//! 有序的阶段配置, 返回重采样后的浮动图像和一条可复用于第二个
//! 浮动体数据 (配对分割) 的变换链.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::data::{LabelVolume, ScanVolume};

mod elastix;
mod pipeline;
mod stages;

pub use elastix::{ElastixChain, ElastixEngine};
pub use pipeline::{RefError, RefErrorKind, RefPipeline};
pub use stages::{Measure, StageSpec, TransformKind};

/// 注册引擎运行时错误.
#[derive(Debug)]
pub enum EngineError {
    /// 外部工具无法启动 (不存在, 无权限等).
    Launch {
        /// 工具名.
        tool: &'static str,

        /// 底层启动错误.
        source: io::Error,
    },

    /// 外部工具以失败状态退出.
    Failed {
        /// 工具名.
        tool: &'static str,

        /// 退出码. 被信号终止时为 `None`.
        status: Option<i32>,

        /// stderr 或日志的末尾片段, 用于简短诊断.
        log_tail: String,
    },

    /// 引擎声称成功但约定的输出文件缺失.
    OutputMissing(PathBuf),

    /// nii 文件读写错误.
    Nifti(nifti::NiftiError),

    /// 其他底层 I/O 错误.
    Io(io::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Launch { tool, source } => write!(f, "cannot launch `{tool}`: {source}"),
            EngineError::Failed { tool, status, log_tail } => match status {
                Some(code) => write!(f, "`{tool}` exited with code {code}: {log_tail}"),
                None => write!(f, "`{tool}` terminated by signal: {log_tail}"),
            },
            EngineError::OutputMissing(p) => write!(f, "engine output missing: {}", p.display()),
            EngineError::Nifti(e) => write!(f, "engine nii error: {e}"),
            EngineError::Io(e) => write!(f, "engine I/O error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<nifti::NiftiError> for EngineError {
    fn from(value: nifti::NiftiError) -> Self {
        Self::Nifti(value)
    }
}

impl From<io::Error> for EngineError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// 外部注册引擎边界.
///
/// 实现方负责把阶段配置翻译成自己的参数格式. 变换链由
/// [`RegistrationEngine::register`] 产生, 被传播调用消费;
/// 链内数据 (如参数文件所在的临时目录) 由实现方独占管理.
pub trait RegistrationEngine {
    /// 一次注册产生的变换链 (1-2 个阶段变换描述).
    type Chain;

    /// 把 `moving` 注册到 `fixed` 上.
    ///
    /// 返回按 `stages` 顺序施加全部变换后的重采样浮动图像,
    /// 以及可复用的变换链.
    fn register(
        &self,
        fixed: &ScanVolume,
        moving: &ScanVolume,
        stages: &[StageSpec],
    ) -> Result<(ScanVolume, Self::Chain), EngineError>;

    /// 用 `chain` 描述的几何映射重采样一份标签体数据.
    ///
    /// 每一阶段都使用最近邻插值: 标签身份必须被精确保留,
    /// 线性插值会在类别间制造不存在的中间值.
    fn resample_label(&self, chain: &Self::Chain, seg: &LabelVolume)
        -> Result<LabelVolume, EngineError>;
}
