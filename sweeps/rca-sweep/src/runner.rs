//! 程序运行函数.
//!
//! 运行参数 (环境变量):
//!
//! - `RCA_SUBJECT` / `RCA_SUBJECTS`: 单个受测对象目录 / 清单文件 (必选其一);
//! - `RCA_REFS_DIR`: 参考库目录, 默认 `$HOME/rca/refs`;
//! - `RCA_OUTPUT`: 输出根目录, 默认当前目录;
//! - `RCA_CONFIG`: 布局约定名 (`5kBIOBANK`, `BIOBANK`, `ATLAS`)
//!   或 JSON 布局文件路径, 默认 `5kBIOBANK`;
//! - `RCA_SEG`: 受测分割文件名覆盖 (可选);
//! - `RCA_GT`: 真值分割文件名 (可选);
//! - `RCA_RIGID_ONLY`: 设置时只做刚性阶段;
//! - `RCA_MAX_REFS`: 最多注册的参考个数, 默认 100;
//! - `RCA_KEEP_WARPED`: 设置时在输出目录下保留传播后的参考分割
//!   (附带中间切片 PNG 快照);
//! - `RCA_ELASTIX_THREADS`: 单次 elastix 调用线程数 (可选).

use std::env;
use std::path::Path;
use std::time::{Duration, Instant};

use rca_berry::config::SubjectLayout;
use rca_berry::dataset::SubjectOverrides;
use rca_berry::rca::claim::{self, ClaimState, FAILED_MARKER};
use rca_berry::rca::{RcaSweep, SweepError, SweepOptions};
use rca_berry::registration::ElastixEngine;
use utils::loader;

use crate::report;

/// 残留占用标记的保鲜期. 注册一批参考通常在数十分钟内完成.
const CLAIM_STALE_AFTER: Duration = Duration::from_secs(30 * 60);

/// 实际运行. 返回进程退出码.
pub fn run() -> i32 {
    let Some(source) = loader::subject_source_from_env() else {
        eprintln!("set $RCA_SUBJECT (one folder) or $RCA_SUBJECTS (list file)");
        return 2;
    };

    let refs_dir = loader::refs_dir_from_env_or_home();
    if !refs_dir.is_dir() {
        eprintln!("reference folder does not exist: {}", refs_dir.display());
        return 2;
    }

    let layout = match resolve_layout() {
        Ok(l) => l,
        Err(msg) => {
            eprintln!("{msg}");
            return 2;
        }
    };

    let engine = build_engine();
    if !engine.is_available() {
        log::warn!("elastix/transformix not found on $PATH; every reference will fail");
    }

    let output_root = loader::output_root_from_env_or_cwd();
    let subjects = match loader::subject_dirs(&source) {
        Ok(it) => it,
        Err(e) => {
            eprintln!("cannot read subject list: {e}");
            return 2;
        }
    };

    let mut failed = 0usize;
    for subject_dir in subjects {
        let output_dir = loader::subject_output_dir(&output_root, &source, &subject_dir);
        if !process_subject(&engine, &layout, &subject_dir, &refs_dir, &output_dir) {
            failed += 1;
        }
    }

    if failed > 0 {
        log::error!("{failed} subject(s) failed");
        1
    } else {
        0
    }
}

/// 处理单个受测对象. 返回是否算作成功 (跳过也算成功).
fn process_subject(
    engine: &ElastixEngine,
    layout: &SubjectLayout,
    subject_dir: &Path,
    refs_dir: &Path,
    output_dir: &Path,
) -> bool {
    let subject_name = subject_dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| subject_dir.display().to_string());
    let result_json = format!("{subject_name}.json");
    let result_bin = format!("{subject_name}.bin");

    let claim = match claim::acquire(
        output_dir,
        &[result_json.as_str(), FAILED_MARKER],
        CLAIM_STALE_AFTER,
    ) {
        Ok(ClaimState::Acquired(c)) => c,
        Ok(ClaimState::AlreadyDone) => {
            log::info!("`{subject_name}` already processed, skipping");
            return true;
        }
        Ok(ClaimState::InFlight) => {
            log::info!("`{subject_name}` in flight elsewhere, skipping");
            return true;
        }
        Err(e) => {
            log::error!("`{subject_name}`: cannot claim output dir: {e}");
            return false;
        }
    };

    let mut opts = SweepOptions {
        both_stages: env::var_os("RCA_RIGID_ONLY").is_none(),
        overrides: SubjectOverrides {
            seg: env::var("RCA_SEG").ok(),
            ground_truth: env::var("RCA_GT").ok(),
        },
        keep_propagated: env::var_os("RCA_KEEP_WARPED").map(|_| output_dir.join("warped")),
        ..SweepOptions::default()
    };
    if let Ok(max) = env::var("RCA_MAX_REFS") {
        match max.parse::<usize>() {
            Ok(n) if n > 0 => opts.max_references = n,
            _ => log::warn!("ignoring bad $RCA_MAX_REFS: {max}"),
        }
    }

    let t0 = Instant::now();
    let outcome = RcaSweep::new(engine, layout, opts).run(subject_dir, refs_dir);

    let ok = match outcome {
        Ok(table) => {
            utils::sep();
            report::print(&table, t0.elapsed());
            utils::sep();

            let mut saved = true;
            for (name, res) in [
                (&result_json, table.save_json(output_dir.join(&result_json))),
                (&result_bin, table.save_bin(output_dir.join(&result_bin))),
            ] {
                if let Err(e) = res {
                    log::error!("`{subject_name}`: cannot save {name}: {e}");
                    saved = false;
                }
            }
            saved
        }
        Err(e) => {
            log::error!("`{subject_name}` failed: {e}");
            if let Err(io) = claim::mark_failed(output_dir, &e.to_string()) {
                log::error!("`{subject_name}`: cannot write failure marker: {io}");
            }
            // 参考全灭通常意味着引擎或数据配置问题, 提示一下.
            if matches!(e, SweepError::AllReferencesFailed { .. }) && !engine.is_available() {
                log::error!("hint: elastix/transformix unavailable");
            }
            false
        }
    };

    claim.release();
    ok
}

/// 解析布局配置: 内置约定名或 JSON 文件路径.
fn resolve_layout() -> Result<SubjectLayout, String> {
    let spec = env::var("RCA_CONFIG").unwrap_or_else(|_| "5kBIOBANK".to_string());

    if let Some(layout) = SubjectLayout::builtin(&spec) {
        return Ok(layout);
    }
    let path = Path::new(&spec);
    if path.is_file() {
        return SubjectLayout::load(path).map_err(|e| format!("config `{spec}`: {e}"));
    }
    Err(format!("config does not exist: {spec}"))
}

/// 组装 elastix 引擎.
fn build_engine() -> ElastixEngine {
    let mut engine = ElastixEngine::new();
    if let Ok(threads) = env::var("RCA_ELASTIX_THREADS") {
        match threads.parse::<u32>() {
            Ok(n) if n > 0 => engine = engine.with_threads(n),
            _ => log::warn!("ignoring bad $RCA_ELASTIX_THREADS: {threads}"),
        }
    } else {
        // 工作池已按参考并行, 单次调用限制在少量线程避免超订.
        let per_call = (utils::cpus() / 4).max(1) as u32;
        engine = engine.with_threads(per_call);
    }
    engine
}
