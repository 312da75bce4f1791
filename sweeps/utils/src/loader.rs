//! 运行目录解析. 环境变量优先, 其次用户主目录/工作目录约定.

use either::Either;
use rca_berry::dataset;
use std::env;
use std::io::{self, BufRead};
use std::iter;
use std::path::{Path, PathBuf};

/// 获取参考 (atlas) 库基本路径.
///
/// 1. 若环境变量 `$RCA_REFS_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/rca/refs`.
pub fn refs_dir_from_env_or_home() -> PathBuf {
    if let Ok(d) = env::var("RCA_REFS_DIR") {
        PathBuf::from(d)
    } else {
        dataset::home_rca_dir_with(["refs"]).unwrap()
    }
}

/// 获取输出根目录.
///
/// 1. 若环境变量 `$RCA_OUTPUT` 非空, 则返回其值;
/// 2. 否则, 返回当前工作目录.
pub fn output_root_from_env_or_cwd() -> PathBuf {
    if let Ok(d) = env::var("RCA_OUTPUT") {
        PathBuf::from(d)
    } else {
        env::current_dir().expect("cannot resolve current dir")
    }
}

/// 受测对象来源: 单个目录, 或逐行列出目录的清单文件.
#[derive(Debug, Clone)]
pub enum SubjectSource {
    /// `$RCA_SUBJECT`: 单个受测对象目录.
    Single(PathBuf),

    /// `$RCA_SUBJECTS`: 清单文件, 每行一个受测对象目录.
    ListFile(PathBuf),
}

/// 从环境变量解析受测对象来源. 两个变量都未设置时返回 `None`;
/// 同时设置时单个目录优先.
pub fn subject_source_from_env() -> Option<SubjectSource> {
    if let Ok(d) = env::var("RCA_SUBJECT") {
        return Some(SubjectSource::Single(PathBuf::from(d)));
    }
    if let Ok(f) = env::var("RCA_SUBJECTS") {
        return Some(SubjectSource::ListFile(PathBuf::from(f)));
    }
    None
}

/// 展开受测对象来源为目录迭代器.
///
/// 清单文件中的空行与 `#` 注释行被跳过.
pub fn subject_dirs(
    source: &SubjectSource,
) -> io::Result<Either<iter::Once<PathBuf>, std::vec::IntoIter<PathBuf>>> {
    match source {
        SubjectSource::Single(dir) => Ok(Either::Left(iter::once(dir.clone()))),
        SubjectSource::ListFile(file) => {
            let reader = io::BufReader::new(std::fs::File::open(file)?);
            let mut dirs = Vec::new();
            for line in reader.lines() {
                let line = line?;
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                dirs.push(PathBuf::from(line));
            }
            Ok(Either::Right(dirs.into_iter()))
        }
    }
}

/// 受测对象的输出目录: 批处理时以对象名区分子目录.
pub fn subject_output_dir(output_root: &Path, source: &SubjectSource, subject_dir: &Path) -> PathBuf {
    match source {
        SubjectSource::Single(_) => output_root.to_owned(),
        SubjectSource::ListFile(_) => {
            let name = subject_dir
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "subject".to_string());
            output_root.join(name)
        }
    }
}
