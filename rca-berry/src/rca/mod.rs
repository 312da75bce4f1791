//! RCA 编排: 对一个受测对象扫描全部参考并汇总.
//!
//! 每个参考的完整管线 (注册 + 传播 + 指标) 相互独立, 只共享只读
//! 输入, 因此以并行工作池展开; 工作者各自返回结果, 唯一的收集点
//! 在扫描末尾合并成结果表. 单个参考的失败被记录并跳过,
//! 不中止其余参考.

pub mod claim;
mod error;
mod result;

pub use error::SweepError;
pub use result::{BestEntry, ReferenceResult, ResultSummary, ResultTable};

#[cfg(feature = "serde")]
pub use result::PersistError;

use std::path::{Path, PathBuf};

use crate::config::SubjectLayout;
use crate::consts::DEFAULT_MAX_REFERENCES;
use crate::dataset::{load_subject, scan_atlas_store, AtlasEntry, SubjectData, SubjectOverrides};
use crate::metrics::{class_metrics, ClassMapping};
use crate::registration::{RefError, RefErrorKind, RefPipeline, RegistrationEngine};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 一次扫描的运行选项.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// 是否在刚性注册之后接续形变阶段. 默认开启.
    pub both_stages: bool,

    /// 最多注册的参考个数 (参考库按名字升序截断).
    pub max_references: usize,

    /// 受测对象文件名覆盖项.
    pub overrides: SubjectOverrides,

    /// 给定目录时, 保留所有传播后的参考分割到该目录下.
    pub keep_propagated: Option<PathBuf>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            both_stages: true,
            max_references: DEFAULT_MAX_REFERENCES,
            overrides: SubjectOverrides::default(),
            keep_propagated: None,
        }
    }
}

/// 一个受测对象的 RCA 扫描编排器.
///
/// 引擎要求 `Sync`: 同一个引擎实例被所有工作者共享.
pub struct RcaSweep<'a, E: RegistrationEngine + Sync> {
    engine: &'a E,
    layout: &'a SubjectLayout,
    opts: SweepOptions,
}

impl<'a, E: RegistrationEngine + Sync> RcaSweep<'a, E> {
    /// 创建编排器.
    pub fn new(engine: &'a E, layout: &'a SubjectLayout, opts: SweepOptions) -> Self {
        Self {
            engine,
            layout,
            opts,
        }
    }

    /// 对 `subject_dir` 下的受测对象执行完整 RCA 扫描.
    ///
    /// 布局/输入/参考库错误在任何注册开始之前返回; 扫描过程中
    /// 单个参考的失败被记录并跳过. 所有参考都失败时返回
    /// [`SweepError::AllReferencesFailed`].
    pub fn run<P: AsRef<Path>>(&self, subject_dir: P, refs_dir: P) -> Result<ResultTable, SweepError> {
        self.layout.validate()?;
        // 校验通过后映射构造不会失败, 可直接 unwrap.
        let mapping = self.layout.class_mapping().unwrap();

        let subject = load_subject(subject_dir, self.layout, &self.opts.overrides)?;
        let entries = scan_atlas_store(refs_dir, self.layout, self.opts.max_references)?;

        if let Some(dir) = &self.opts.keep_propagated {
            if let Err(e) = std::fs::create_dir_all(dir) {
                log::warn!("cannot create keep-dir {}: {e}", dir.display());
            }
        }

        log::info!(
            "RCA on `{}` with {} reference(s), {} stage(s)",
            subject.name,
            entries.len(),
            if self.opts.both_stages { 2 } else { 1 }
        );

        let pipeline = RefPipeline::new(self.engine, &subject.scan, self.opts.both_stages);
        let outcomes = self.fan_out(&pipeline, &subject, &mapping, &entries);

        let mut references = Vec::with_capacity(outcomes.len());
        let mut skipped = 0usize;
        for outcome in outcomes {
            match outcome {
                Ok(r) => references.push(r),
                Err(e) => {
                    skipped += 1;
                    log::warn!("skipping {e}");
                }
            }
        }

        if references.is_empty() {
            return Err(SweepError::AllReferencesFailed {
                attempted: entries.len(),
            });
        }

        let ground_truth = match &subject.ground_truth {
            None => None,
            Some(gt) => {
                // 校验通过后恒等映射构造不会失败, 可直接 unwrap.
                let gt_mapping = self.layout.ground_truth_mapping().unwrap();
                Some(class_metrics(&subject.seg, gt, &gt_mapping).map_err(SweepError::GroundTruth)?)
            }
        };

        let table = ResultTable::new(subject.name, mapping, references, skipped, ground_truth);
        log::info!(
            "`{}`: predicted DSC {:.3} (atlas `{}`), {} skipped",
            table.subject,
            table.predicted_dice().value,
            table.predicted_dice().atlas,
            table.skipped
        );
        Ok(table)
    }

    /// 把逐参考管线展开到工作池 (或在未启用 `rayon` 时顺序执行).
    fn fan_out(
        &self,
        pipeline: &RefPipeline<'_, E>,
        subject: &SubjectData,
        mapping: &ClassMapping,
        entries: &[AtlasEntry],
    ) -> Vec<Result<ReferenceResult, RefError>> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                entries
                    .par_iter()
                    .map(|e| self.process_one(pipeline, subject, mapping, e))
                    .collect()
            } else {
                entries
                    .iter()
                    .map(|e| self.process_one(pipeline, subject, mapping, e))
                    .collect()
            }
        }
    }

    /// 处理单个参考: 注册-传播-聚合, 任何失败都归于该参考.
    fn process_one(
        &self,
        pipeline: &RefPipeline<'_, E>,
        subject: &SubjectData,
        mapping: &ClassMapping,
        entry: &AtlasEntry,
    ) -> Result<ReferenceResult, RefError> {
        let propagated = pipeline.propagate(entry)?;

        let metrics = class_metrics(&subject.seg, &propagated, mapping).map_err(|e| RefError {
            atlas: entry.name.clone(),
            kind: RefErrorKind::Metrics(e),
        })?;

        if let Some(dir) = &self.opts.keep_propagated {
            let path = dir.join(format!("{}_to_{}_seg.nii.gz", entry.name, subject.name));
            if let Err(e) = propagated.save(&path) {
                log::warn!("cannot keep propagated seg of `{}`: {e}", entry.name);
            }
            // 顺手落一张中间切片快照, 便于肉眼 QC.
            let png = dir.join(format!("{}_to_{}_seg.png", entry.name, subject.name));
            if let Err(e) = propagated.save_midslice_png(&png) {
                log::warn!("cannot snapshot propagated seg of `{}`: {e}", entry.name);
            }
        }

        log::debug!(
            "reference `{}` done, foreground DSC {:.3}",
            entry.name,
            metrics.foreground_dice()
        );
        Ok(ReferenceResult {
            atlas: entry.name.clone(),
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{synthetic_header, LabelVolume, ScanVolume};
    use crate::registration::{EngineError, StageSpec};
    use ndarray::Array3;
    use std::fs;

    /// 恒等引擎: 原样返回浮动数据. 模拟 "参考与受测完全对齐".
    struct IdentityEngine;

    impl RegistrationEngine for IdentityEngine {
        type Chain = ();

        fn register(
            &self,
            _fixed: &ScanVolume,
            moving: &ScanVolume,
            _stages: &[StageSpec],
        ) -> Result<(ScanVolume, Self::Chain), EngineError> {
            Ok((moving.clone(), ()))
        }

        fn resample_label(
            &self,
            _chain: &Self::Chain,
            seg: &LabelVolume,
        ) -> Result<LabelVolume, EngineError> {
            Ok(seg.clone())
        }
    }

    fn plain_layout() -> SubjectLayout {
        SubjectLayout {
            image: "image.nii".to_string(),
            seg: "seg.nii".to_string(),
            landmarks: None,
            subject_classes: vec![0, 1],
            reference_classes: vec![0, 1],
        }
    }

    fn block_seg() -> LabelVolume {
        let mut labels = Array3::<u8>::zeros((6, 6, 6));
        for z in 2..4 {
            for h in 2..4 {
                for w in 2..4 {
                    labels[(z, h, w)] = 1;
                }
            }
        }
        LabelVolume::from_parts(synthetic_header((6, 6, 6), [1.0; 3]), labels).unwrap()
    }

    fn write_subject(dir: &Path, layout: &SubjectLayout, with_gt: bool) {
        let scan = ScanVolume::from_parts(
            synthetic_header((6, 6, 6), [1.0; 3]),
            Array3::<f32>::ones((6, 6, 6)),
        )
        .unwrap();
        scan.save(dir.join(&layout.image)).unwrap();
        block_seg().save(dir.join(&layout.seg)).unwrap();
        if with_gt {
            block_seg().save(dir.join("gt.nii")).unwrap();
        }
    }

    fn write_refs(dir: &Path, layout: &SubjectLayout, names: &[&str], corrupt: &[&str]) {
        for name in names {
            let sub = dir.join(name);
            fs::create_dir(&sub).unwrap();
            let scan = ScanVolume::from_parts(
                synthetic_header((6, 6, 6), [1.0; 3]),
                Array3::<f32>::ones((6, 6, 6)),
            )
            .unwrap();
            scan.save(sub.join(&layout.image)).unwrap();
            if corrupt.contains(name) {
                fs::write(sub.join(&layout.seg), b"definitely not a nifti").unwrap();
            } else {
                block_seg().save(sub.join(&layout.seg)).unwrap();
            }
        }
    }

    /// 恒等注册的完整扫描: 全参考 Dice = 1, HD = 0; 真值直接比较
    /// 与独立的聚合调用一致.
    #[test]
    fn test_identity_sweep_with_ground_truth() {
        let layout = plain_layout();
        let subject_root = tempfile::tempdir().unwrap();
        let subject_dir = subject_root.path().join("patient7");
        fs::create_dir(&subject_dir).unwrap();
        write_subject(&subject_dir, &layout, true);

        let refs_root = tempfile::tempdir().unwrap();
        write_refs(refs_root.path(), &layout, &["r0", "r1"], &[]);

        let opts = SweepOptions {
            overrides: SubjectOverrides {
                seg: None,
                ground_truth: Some("gt.nii".to_string()),
            },
            ..SweepOptions::default()
        };
        let sweep = RcaSweep::new(&IdentityEngine, &layout, opts);
        let table = sweep.run(subject_dir.as_path(), refs_root.path()).unwrap();

        assert_eq!(table.subject, "patient7");
        assert_eq!(table.references.len(), 2);
        assert_eq!(table.skipped, 0);
        assert!((table.predicted_dice().value - 1.0).abs() < 1e-12);
        assert_eq!(table.predicted_hausdorff().value, 0.0);
        // 并列的满分参考: 首个获胜.
        assert_eq!(table.predicted_dice().atlas, "r0");

        // 真值比较等价于对同两个体数据独立运行聚合器.
        let gt = LabelVolume::open(subject_dir.join("gt.nii")).unwrap();
        let seg = LabelVolume::open(subject_dir.join(&layout.seg)).unwrap();
        let standalone =
            class_metrics(&seg, &gt, &layout.ground_truth_mapping().unwrap()).unwrap();
        assert_eq!(table.ground_truth.as_ref().unwrap(), &standalone);
    }

    /// N 个参考中 1 个失败: 结果表恰含 N-1 项, 扫描不中止.
    #[test]
    fn test_one_failed_reference_is_skipped() {
        let layout = plain_layout();
        let subject_root = tempfile::tempdir().unwrap();
        let subject_dir = subject_root.path().join("s");
        fs::create_dir(&subject_dir).unwrap();
        write_subject(&subject_dir, &layout, false);

        let refs_root = tempfile::tempdir().unwrap();
        write_refs(refs_root.path(), &layout, &["a", "b", "c"], &["b"]);

        let sweep = RcaSweep::new(&IdentityEngine, &layout, SweepOptions::default());
        let table = sweep.run(subject_dir.as_path(), refs_root.path()).unwrap();

        assert_eq!(table.references.len(), 2);
        assert_eq!(table.skipped, 1);
        let names: Vec<&str> = table.references.iter().map(|r| r.atlas.as_str()).collect();
        assert!(!names.contains(&"b"));
    }

    /// 所有参考都失败: 受测对象级错误.
    #[test]
    fn test_all_references_failed() {
        let layout = plain_layout();
        let subject_root = tempfile::tempdir().unwrap();
        let subject_dir = subject_root.path().join("s");
        fs::create_dir(&subject_dir).unwrap();
        write_subject(&subject_dir, &layout, false);

        let refs_root = tempfile::tempdir().unwrap();
        write_refs(refs_root.path(), &layout, &["only"], &["only"]);

        let sweep = RcaSweep::new(&IdentityEngine, &layout, SweepOptions::default());
        let err = sweep.run(subject_dir.as_path(), refs_root.path()).unwrap_err();
        assert!(matches!(err, SweepError::AllReferencesFailed { attempted: 1 }));
    }

    /// 缺受测文件是扫描开始前的致命错误.
    #[test]
    fn test_missing_subject_is_fatal() {
        let layout = plain_layout();
        let refs_root = tempfile::tempdir().unwrap();
        write_refs(refs_root.path(), &layout, &["r0"], &[]);

        let sweep = RcaSweep::new(&IdentityEngine, &layout, SweepOptions::default());
        let err = sweep
            .run(Path::new("/nonexistent/subject"), refs_root.path())
            .unwrap_err();
        assert!(matches!(err, SweepError::Subject(_)));
    }
}
