//! elastix / transformix 外部引擎驱动.
//!
//! 每次注册在独立临时目录内进行: 固定/浮动图像落盘, 按阶段生成
//! elastix 参数文件, 调用 `elastix` 完成注册; 随后的标签传播改写
//! 各阶段的 `TransformParameters.N.txt` (重采样插值器 → 最近邻,
//! 输出体素类型 → unsigned char), 再调用 `transformix`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use super::{EngineError, Measure, RegistrationEngine, StageSpec, TransformKind};
use crate::data::{LabelVolume, ScanVolume};

/// 一次 elastix 注册产生的变换链.
///
/// 持有注册所在的临时目录, 链与目录同生命周期; 链被 drop
/// 时目录及其中的参数文件一并清理.
#[derive(Debug)]
pub struct ElastixChain {
    workdir: TempDir,
    stage_files: Vec<PathBuf>,
}

impl ElastixChain {
    /// 变换链的阶段数 (1-2).
    #[inline]
    pub fn len(&self) -> usize {
        self.stage_files.len()
    }

    /// 变换链是否为空. 按构造恒为 `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stage_files.is_empty()
    }
}

/// 以外部 `elastix` / `transformix` 可执行程序实现的注册引擎.
#[derive(Debug, Clone)]
pub struct ElastixEngine {
    elastix_bin: String,
    transformix_bin: String,
    threads: Option<u32>,
}

impl Default for ElastixEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ElastixEngine {
    /// 以 `$PATH` 中的默认工具名创建引擎.
    pub fn new() -> Self {
        Self {
            elastix_bin: "elastix".to_string(),
            transformix_bin: "transformix".to_string(),
            threads: None,
        }
    }

    /// 指定两个可执行程序的路径.
    pub fn with_binaries(mut self, elastix: impl Into<String>, transformix: impl Into<String>) -> Self {
        self.elastix_bin = elastix.into();
        self.transformix_bin = transformix.into();
        self
    }

    /// 限制单次调用的线程数. 参考级并行扫描时应当收紧,
    /// 避免与工作池超订.
    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = Some(threads);
        self
    }

    /// 两个外部工具是否都可用?
    pub fn is_available(&self) -> bool {
        let probe = |bin: &str| {
            Command::new(bin)
                .arg("--help")
                .output()
                .map(|_| true)
                .unwrap_or(false)
        };
        probe(&self.elastix_bin) && probe(&self.transformix_bin)
    }

    fn run(&self, tool: &'static str, cmd: &mut Command) -> Result<(), EngineError> {
        let output = cmd
            .output()
            .map_err(|source| EngineError::Launch { tool, source })?;
        if !output.status.success() {
            return Err(EngineError::Failed {
                tool,
                status: output.status.code(),
                log_tail: log_tail(&output.stderr),
            });
        }
        Ok(())
    }
}

/// 截取 stderr 末尾片段用于诊断.
fn log_tail(stderr: &[u8]) -> String {
    const TAIL: usize = 400;
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().nth_back(TAIL) {
        Some((idx, _)) => text[idx..].to_string(),
        None => text.to_string(),
    }
}

/// 生成一个阶段的 elastix 参数文件内容.
fn emit_stage(spec: &StageSpec) -> String {
    let mut p = String::with_capacity(1024);
    let mut kv = |key: &str, value: &str| {
        writeln!(p, "({key} {value})").unwrap();
    };

    kv("FixedInternalImagePixelType", "\"float\"");
    kv("MovingInternalImagePixelType", "\"float\"");
    kv("UseDirectionCosines", "\"true\"");

    kv("Registration", "\"MultiResolutionRegistration\"");
    kv("FixedImagePyramid", "\"FixedSmoothingImagePyramid\"");
    kv("MovingImagePyramid", "\"MovingSmoothingImagePyramid\"");
    kv("Interpolator", "\"LinearInterpolator\"");
    kv("ResampleInterpolator", "\"FinalLinearInterpolator\"");
    kv("Resampler", "\"DefaultResampler\"");
    kv("Optimizer", "\"AdaptiveStochasticGradientDescent\"");
    kv("HowToCombineTransforms", "\"Compose\"");

    match &spec.transform {
        TransformKind::Similarity => {
            kv("Transform", "\"SimilarityTransform\"");
            kv("AutomaticScalesEstimation", "\"true\"");
        }
        TransformKind::BSpline {
            final_grid_mm,
            grid_schedule,
        } => {
            kv("Transform", "\"BSplineTransform\"");
            kv("FinalGridSpacingInPhysicalUnits", &format!("{final_grid_mm}"));
            let schedule = grid_schedule
                .iter()
                .map(|g| format!("{g:.1}"))
                .collect::<Vec<_>>()
                .join(" ");
            kv("GridSpacingSchedule", &schedule);
        }
    }
    if spec.cog_init {
        kv("AutomaticTransformInitialization", "\"true\"");
        kv("AutomaticTransformInitializationMethod", "\"CenterOfGravity\"");
    }

    match spec.measure {
        Measure::MattesMutualInformation => kv("Metric", "\"AdvancedMattesMutualInformation\""),
        Measure::MeanSquares => kv("Metric", "\"AdvancedMeanSquares\""),
    }
    kv("NumberOfHistogramBins", "32");

    kv("NumberOfResolutions", &spec.resolutions.to_string());
    if let Some(schedule) = &spec.pyramid_schedule {
        let flat = schedule
            .iter()
            .flatten()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        kv("ImagePyramidSchedule", &flat);
    }

    kv("MaximumNumberOfIterations", &spec.iterations.to_string());
    kv("ImageSampler", "\"RandomCoordinate\"");
    kv("NumberOfSpatialSamples", &spec.spatial_samples.to_string());
    kv("NewSamplesEveryIteration", "\"true\"");
    kv("ErodeMask", "\"false\"");

    kv("WriteResultImage", "\"true\"");
    kv("ResultImageFormat", "\"nii\"");
    kv("CompressResultImage", "\"false\"");
    kv("DefaultPixelValue", "0");

    p
}

/// 改写一个阶段的变换参数文件用于标签传播.
///
/// 1. 重采样插值器改为最近邻;
/// 2. 输出体素类型改为 unsigned char;
/// 3. `initial` 给定时, 阶段间的初始变换引用改指向改写后的文件,
///    使整条链都按最近邻重采样.
fn patch_transform_params(text: &str, initial: Option<&Path>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut saw_interp = false;
    let mut saw_pixel_type = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("(ResampleInterpolator") {
            out.push_str("(ResampleInterpolator \"FinalNearestNeighborInterpolator\")\n");
            saw_interp = true;
        } else if trimmed.starts_with("(ResultImagePixelType") {
            out.push_str("(ResultImagePixelType \"unsigned char\")\n");
            saw_pixel_type = true;
        } else if trimmed.starts_with("(InitialTransformParametersFileName")
            && !trimmed.contains("NoInitialTransform")
        {
            match initial {
                Some(p) => {
                    out.push_str(&format!(
                        "(InitialTransformParametersFileName \"{}\")\n",
                        p.display()
                    ));
                }
                None => {
                    out.push_str(line);
                    out.push('\n');
                }
            }
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }

    if !saw_interp {
        out.push_str("(ResampleInterpolator \"FinalNearestNeighborInterpolator\")\n");
    }
    if !saw_pixel_type {
        out.push_str("(ResultImagePixelType \"unsigned char\")\n");
    }
    out
}

impl RegistrationEngine for ElastixEngine {
    type Chain = ElastixChain;

    fn register(
        &self,
        fixed: &ScanVolume,
        moving: &ScanVolume,
        stages: &[StageSpec],
    ) -> Result<(ScanVolume, Self::Chain), EngineError> {
        assert!(!stages.is_empty(), "注册至少需要一个阶段");

        let workdir = TempDir::with_prefix("rca-elastix-")?;
        let fixed_path = workdir.path().join("fixed.nii");
        let moving_path = workdir.path().join("moving.nii");
        fixed.save(&fixed_path)?;
        moving.save(&moving_path)?;

        let mut cmd = Command::new(&self.elastix_bin);
        cmd.arg("-f")
            .arg(&fixed_path)
            .arg("-m")
            .arg(&moving_path)
            .arg("-out")
            .arg(workdir.path());
        for (idx, spec) in stages.iter().enumerate() {
            let param_path = workdir.path().join(format!("stage_{idx}.txt"));
            std::fs::write(&param_path, emit_stage(spec))?;
            cmd.arg("-p").arg(&param_path);
        }
        if let Some(threads) = self.threads {
            cmd.arg("-threads").arg(threads.to_string());
        }

        log::debug!("elastix: {} stage(s) in {}", stages.len(), workdir.path().display());
        self.run("elastix", &mut cmd)?;

        let result_path = workdir.path().join(format!("result.{}.nii", stages.len() - 1));
        if !result_path.is_file() {
            return Err(EngineError::OutputMissing(result_path));
        }
        let warped = ScanVolume::open(&result_path)?;

        let stage_files: Vec<PathBuf> = (0..stages.len())
            .map(|idx| workdir.path().join(format!("TransformParameters.{idx}.txt")))
            .collect();
        if let Some(missing) = stage_files.iter().find(|p| !p.is_file()) {
            return Err(EngineError::OutputMissing(missing.clone()));
        }

        Ok((warped, ElastixChain { workdir, stage_files }))
    }

    fn resample_label(
        &self,
        chain: &Self::Chain,
        seg: &LabelVolume,
    ) -> Result<LabelVolume, EngineError> {
        let dir = chain.workdir.path();

        // 逐阶段改写参数文件, 链式引用指向前一个改写结果.
        let mut patched_prev: Option<PathBuf> = None;
        for (idx, original) in chain.stage_files.iter().enumerate() {
            let text = std::fs::read_to_string(original)?;
            let patched = patch_transform_params(&text, patched_prev.as_deref());
            let patched_path = dir.join(format!("TransformParameters.{idx}.nn.txt"));
            std::fs::write(&patched_path, patched)?;
            patched_prev = Some(patched_path);
        }
        // 链非空不变式由 `register` 保证.
        let last_patched = patched_prev.unwrap();

        let seg_path = dir.join("labels.nii");
        seg.save(&seg_path)?;

        let out_dir = dir.join("propagated");
        std::fs::create_dir_all(&out_dir)?;

        let mut cmd = Command::new(&self.transformix_bin);
        cmd.arg("-in")
            .arg(&seg_path)
            .arg("-tp")
            .arg(&last_patched)
            .arg("-out")
            .arg(&out_dir);
        if let Some(threads) = self.threads {
            cmd.arg("-threads").arg(threads.to_string());
        }

        self.run("transformix", &mut cmd)?;

        let result_path = out_dir.join("result.nii");
        if !result_path.is_file() {
            return Err(EngineError::OutputMissing(result_path));
        }
        Ok(LabelVolume::open(&result_path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 刚性阶段参数文件包含约定的关键键值.
    #[test]
    fn test_emit_rigid() {
        let text = emit_stage(&StageSpec::rigid());
        assert!(text.contains("(Transform \"SimilarityTransform\")"));
        assert!(text.contains("(AutomaticTransformInitializationMethod \"CenterOfGravity\")"));
        assert!(text.contains("(Metric \"AdvancedMattesMutualInformation\")"));
        assert!(text.contains("(NumberOfResolutions 4)"));
        assert!(text.contains("(HowToCombineTransforms \"Compose\")"));
        assert!(!text.contains("GridSpacingSchedule"));
    }

    /// 形变阶段参数文件: B 样条网格与金字塔调度.
    #[test]
    fn test_emit_deformable() {
        let text = emit_stage(&StageSpec::deformable());
        assert!(text.contains("(Transform \"BSplineTransform\")"));
        assert!(text.contains("(FinalGridSpacingInPhysicalUnits 16)"));
        assert!(text.contains("(GridSpacingSchedule 4.0 2.0)"));
        assert!(text.contains("(NumberOfResolutions 2)"));
        assert!(text.contains("(ImagePyramidSchedule 4 4 2 2 2 2)"));
        assert!(text.contains("(NumberOfSpatialSamples 1024)"));
        assert!(!text.contains("AutomaticTransformInitialization "));
    }

    /// 传播改写: 插值器/体素类型被替换, 链式引用被重定向.
    #[test]
    fn test_patch_transform_params() {
        let original = "(Transform \"BSplineTransform\")\n\
                        (InitialTransformParametersFileName \"/tmp/x/TransformParameters.0.txt\")\n\
                        (ResampleInterpolator \"FinalLinearInterpolator\")\n\
                        (ResultImagePixelType \"float\")\n";
        let redirect = Path::new("/tmp/x/TransformParameters.0.nn.txt");
        let patched = patch_transform_params(original, Some(redirect));

        assert!(patched.contains("(ResampleInterpolator \"FinalNearestNeighborInterpolator\")"));
        assert!(patched.contains("(ResultImagePixelType \"unsigned char\")"));
        assert!(patched.contains("TransformParameters.0.nn.txt"));
        assert!(!patched.contains("FinalLinearInterpolator"));
        assert!(!patched.contains("\"float\""));
    }

    /// 首阶段的 `NoInitialTransform` 保持原样.
    #[test]
    fn test_patch_keeps_no_initial() {
        let original = "(InitialTransformParametersFileName \"NoInitialTransform\")\n\
                        (ResampleInterpolator \"FinalLinearInterpolator\")\n";
        let patched = patch_transform_params(original, None);
        assert!(patched.contains("NoInitialTransform"));
        // 缺失的键被补齐.
        assert!(patched.contains("(ResultImagePixelType \"unsigned char\")"));
    }
}
