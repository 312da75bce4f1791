//! 数据集操作: 参考 (atlas) 库与受测对象目录.
//!
//! 参考库是一个目录, 其下每个子目录是一个已分割的参考对象,
//! 内含布局约定的强度图像文件与分割文件; 受测对象目录同理,
//! 另可附带真值分割.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use itertools::Itertools;

use crate::config::SubjectLayout;
use crate::data::{LabelVolume, ScanVolume, VolumePair};

/// 获取 `{用户主目录}/rca` 目录.
pub fn home_rca_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("rca");
    Some(ans)
}

/// 获取 `{用户主目录}/rca` 目录下给定继续项组成的全路径.
pub fn home_rca_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_rca_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 扫描参考库错误.
#[derive(Debug)]
pub enum StoreError {
    /// 给定路径不是目录.
    NotADirectory(PathBuf),

    /// 参考库目录下没有任何可用参考.
    NoEntries(PathBuf),

    /// 其他底层 I/O 错误.
    Io(io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotADirectory(p) => write!(f, "reference store is not a directory: {}", p.display()),
            StoreError::NoEntries(p) => write!(f, "reference store has no entries: {}", p.display()),
            StoreError::Io(e) => write!(f, "reference store I/O error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// 参考库中的一个参考对象: 名字与两份文件的路径.
///
/// 文件内容按需懒加载, 扫描阶段只记录路径.
#[derive(Debug, Clone)]
pub struct AtlasEntry {
    /// 参考名, 即子目录名.
    pub name: String,

    /// 强度图像文件路径.
    pub image: PathBuf,

    /// 分割文件路径.
    pub seg: PathBuf,
}

impl AtlasEntry {
    /// 打开该参考的强度图像与分割.
    pub fn open(&self) -> nifti::Result<VolumePair> {
        VolumePair::open(&self.image, &self.seg)
    }
}

/// 按名字升序扫描参考库, 最多返回前 `max` 项.
///
/// 子目录中缺少布局约定文件的项被静默跳过 (参考库可能混有
/// 其他内容); 一项可用参考都没有时返回 `Err`.
pub fn scan_atlas_store<P: AsRef<Path>>(
    dir: P,
    layout: &SubjectLayout,
    max: usize,
) -> Result<Vec<AtlasEntry>, StoreError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(StoreError::NotADirectory(dir.to_owned()));
    }

    let entries: Vec<AtlasEntry> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .sorted_unstable()
        .map(|name| AtlasEntry {
            image: dir.join(&name).join(&layout.image),
            seg: dir.join(&name).join(&layout.seg),
            name,
        })
        .filter(|e| e.image.is_file() && e.seg.is_file())
        .take(max)
        .collect();

    if entries.is_empty() {
        return Err(StoreError::NoEntries(dir.to_owned()));
    }
    Ok(entries)
}

/// 载入受测对象错误.
#[derive(Debug)]
pub enum SubjectError {
    /// 给定路径不是目录.
    NotADirectory(PathBuf),

    /// 布局约定的文件缺失.
    MissingFile(PathBuf),

    /// nii 文件读取/解析错误.
    Nifti(nifti::NiftiError),
}

impl fmt::Display for SubjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectError::NotADirectory(p) => write!(f, "subject folder does not exist: {}", p.display()),
            SubjectError::MissingFile(p) => write!(f, "subject file does not exist: {}", p.display()),
            SubjectError::Nifti(e) => write!(f, "subject nii error: {e}"),
        }
    }
}

impl std::error::Error for SubjectError {}

impl From<nifti::NiftiError> for SubjectError {
    fn from(value: nifti::NiftiError) -> Self {
        Self::Nifti(value)
    }
}

/// 一个受测对象的全部输入.
#[derive(Debug, Clone)]
pub struct SubjectData {
    /// 受测对象名, 即目录名.
    pub name: String,

    /// 强度图像.
    pub scan: ScanVolume,

    /// 受测 (待评估) 分割.
    pub seg: LabelVolume,

    /// 真值分割. 仅在回顾性验证场景下提供.
    pub ground_truth: Option<LabelVolume>,
}

/// 受测对象文件名覆盖项.
///
/// 布局给出默认文件名; 单次运行可用命令侧提供的名字覆盖受测分割,
/// 并指定真值分割文件.
#[derive(Debug, Clone, Default)]
pub struct SubjectOverrides {
    /// 受测分割文件名覆盖.
    pub seg: Option<String>,

    /// 真值分割文件名. `None` 表示无真值.
    pub ground_truth: Option<String>,
}

/// 按布局从目录载入受测对象.
///
/// 布局约定的文件缺失或无法解析时返回 `Err`; 这类错误对该受测
/// 对象是致命的, 但不应中止整个批次.
pub fn load_subject<P: AsRef<Path>>(
    dir: P,
    layout: &SubjectLayout,
    overrides: &SubjectOverrides,
) -> Result<SubjectData, SubjectError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(SubjectError::NotADirectory(dir.to_owned()));
    }

    let name = dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string());

    let seg_name = overrides.seg.as_deref().unwrap_or(&layout.seg);
    let image_path = dir.join(&layout.image);
    let seg_path = dir.join(seg_name);

    for p in [&image_path, &seg_path] {
        if !p.is_file() {
            return Err(SubjectError::MissingFile(p.clone()));
        }
    }

    let ground_truth = match overrides.ground_truth.as_deref() {
        None => None,
        Some(gt_name) => {
            let gt_path = dir.join(gt_name);
            if !gt_path.is_file() {
                return Err(SubjectError::MissingFile(gt_path));
            }
            Some(LabelVolume::open(&gt_path)?)
        }
    };

    Ok(SubjectData {
        name,
        scan: ScanVolume::open(&image_path)?,
        seg: LabelVolume::open(&seg_path)?,
        ground_truth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic_header;
    use ndarray::Array3;
    use std::fs;

    fn write_pair(dir: &Path, layout: &SubjectLayout) {
        let scan = ScanVolume::from_parts(
            synthetic_header((3, 4, 4), [1.0; 3]),
            Array3::<f32>::zeros((3, 4, 4)),
        )
        .unwrap();
        let mut labels = Array3::<u8>::zeros((3, 4, 4));
        labels[(1, 2, 2)] = 1;
        let seg = LabelVolume::from_parts(synthetic_header((3, 4, 4), [1.0; 3]), labels).unwrap();

        scan.save(dir.join(&layout.image)).unwrap();
        seg.save(dir.join(&layout.seg)).unwrap();
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

    /// 扫描参考库: 排序、跳过不完整子目录、上限截断.
    #[test]
    fn test_scan_atlas_store() {
        let layout = plain_layout();
        let root = tempfile::tempdir().unwrap();

        for name in ["b", "a", "c"] {
            let sub = root.path().join(name);
            fs::create_dir(&sub).unwrap();
            write_pair(&sub, &layout);
        }
        // 不完整的子目录: 只有图像没有分割.
        let broken = root.path().join("d");
        fs::create_dir(&broken).unwrap();
        fs::write(broken.join(&layout.image), b"not a nifti").unwrap();

        let all = scan_atlas_store(root.path(), &layout, usize::MAX).unwrap();
        let names: Vec<&str> = all.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);

        let capped = scan_atlas_store(root.path(), &layout, 2).unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].name, "a");

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            scan_atlas_store(empty.path(), &layout, usize::MAX),
            Err(StoreError::NoEntries(_))
        ));
    }

    /// 载入受测对象与文件名覆盖.
    #[test]
    fn test_load_subject() {
        let layout = plain_layout();
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("subject42");
        fs::create_dir(&dir).unwrap();
        write_pair(&dir, &layout);

        let data = load_subject(&dir, &layout, &SubjectOverrides::default()).unwrap();
        assert_eq!(data.name, "subject42");
        assert!(data.ground_truth.is_none());
        assert_eq!(data.seg.distinct_labels(), vec![0, 1]);

        // 缺真值文件时报告准确路径.
        let overrides = SubjectOverrides {
            seg: None,
            ground_truth: Some("gt.nii".to_string()),
        };
        assert!(matches!(
            load_subject(&dir, &layout, &overrides),
            Err(SubjectError::MissingFile(_))
        ));
    }
}
