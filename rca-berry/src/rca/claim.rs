//! 受测对象输出目录的占用标记.
//!
//! 批处理可能被中断后重跑, 也可能有多个进程分摊同一批受测对象.
//! 开始处理前先以 `create_new` 原子地创建占用标记; 标记已存在且
//! 仍新鲜说明另一进程在处理, 跳过; 超过保鲜期的残留标记可被回收.
//! 完成标记 (结果文件或失败标记) 存在时直接跳过, 重入是幂等的.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 占用标记文件名.
pub const CLAIM_FILE: &str = ".rca-claim";

/// 失败标记文件名. 记录该受测对象上次运行失败, 重跑时跳过.
pub const FAILED_MARKER: &str = "failed";

/// 占用尝试的结果.
#[derive(Debug)]
pub enum ClaimState {
    /// 占用成功. 持有者负责在完成后释放.
    Acquired(SubjectClaim),

    /// 完成标记已存在, 无需处理.
    AlreadyDone,

    /// 另一进程正在处理 (标记存在且新鲜).
    InFlight,
}

/// 已持有的占用标记.
///
/// drop 时尽力删除标记文件; 进程崩溃时标记残留,
/// 由下次运行的保鲜期判断回收.
#[derive(Debug)]
pub struct SubjectClaim {
    path: PathBuf,
}

impl SubjectClaim {
    /// 显式释放占用标记.
    pub fn release(self) {
        // drop 负责删除.
    }
}

impl Drop for SubjectClaim {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// 在 `output_dir` 上尝试占用一个受测对象.
///
/// `done_markers` 为相对 `output_dir` 的完成标记文件名列表
/// (通常是结果文件与 [`FAILED_MARKER`]); 任一存在即返回
/// [`ClaimState::AlreadyDone`]. 残留占用标记超过 `stale_after`
/// 时回收重占.
pub fn acquire(
    output_dir: &Path,
    done_markers: &[&str],
    stale_after: Duration,
) -> io::Result<ClaimState> {
    fs::create_dir_all(output_dir)?;

    if done_markers.iter().any(|m| output_dir.join(m).exists()) {
        return Ok(ClaimState::AlreadyDone);
    }

    let claim_path = output_dir.join(CLAIM_FILE);
    match try_create(&claim_path)? {
        true => Ok(ClaimState::Acquired(SubjectClaim { path: claim_path })),
        false => {
            let fresh = claim_age(&claim_path)
                .map(|age| age <= stale_after)
                .unwrap_or(false);
            if fresh {
                return Ok(ClaimState::InFlight);
            }

            log::warn!("reclaiming stale claim: {}", claim_path.display());
            let _ = fs::remove_file(&claim_path);
            match try_create(&claim_path)? {
                true => Ok(ClaimState::Acquired(SubjectClaim { path: claim_path })),
                // 回收竞争失败: 另一进程抢先重占.
                false => Ok(ClaimState::InFlight),
            }
        }
    }
}

/// 在 `output_dir` 下写失败标记.
pub fn mark_failed(output_dir: &Path, reason: &str) -> io::Result<()> {
    fs::create_dir_all(output_dir)?;
    fs::write(output_dir.join(FAILED_MARKER), reason)
}

/// 原子地尝试创建占用标记. 返回是否创建成功.
fn try_create(claim_path: &Path) -> io::Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(claim_path) {
        Ok(mut file) => {
            let _ = writeln!(file, "pid {}", std::process::id());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// 占用标记距最后修改的时长. 文件消失或时钟异常时返回 `None`.
fn claim_age(claim_path: &Path) -> Option<Duration> {
    let modified = claim_path.metadata().ok()?.modified().ok()?;
    modified.elapsed().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86400);

    /// 基本占用流程: 首次成功, 二次在途, 释放后可重占.
    #[test]
    fn test_acquire_release() {
        let dir = tempfile::tempdir().unwrap();

        let claim = match acquire(dir.path(), &[], DAY).unwrap() {
            ClaimState::Acquired(c) => c,
            other => panic!("expected Acquired, got {other:?}"),
        };
        assert!(matches!(acquire(dir.path(), &[], DAY).unwrap(), ClaimState::InFlight));

        claim.release();
        assert!(matches!(acquire(dir.path(), &[], DAY).unwrap(), ClaimState::Acquired(_)));
    }

    /// 残留标记超过保鲜期时被回收.
    #[test]
    fn test_stale_reclaim() {
        let dir = tempfile::tempdir().unwrap();

        let first = acquire(dir.path(), &[], DAY).unwrap();
        assert!(matches!(first, ClaimState::Acquired(_)));
        // 模拟崩溃: 不释放, 直接遗忘.
        std::mem::forget(first);

        // 保鲜期为零, 任何已存在标记都视为残留.
        assert!(matches!(
            acquire(dir.path(), &[], Duration::ZERO).unwrap(),
            ClaimState::Acquired(_)
        ));
    }

    /// 完成标记存在时直接跳过.
    #[test]
    fn test_done_marker_skips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("subject.json"), b"{}").unwrap();

        assert!(matches!(
            acquire(dir.path(), &["subject.json", FAILED_MARKER], DAY).unwrap(),
            ClaimState::AlreadyDone
        ));
    }

    /// 失败标记也算完成标记.
    #[test]
    fn test_failed_marker() {
        let dir = tempfile::tempdir().unwrap();
        mark_failed(dir.path(), "boom").unwrap();

        assert!(matches!(
            acquire(dir.path(), &[FAILED_MARKER], DAY).unwrap(),
            ClaimState::AlreadyDone
        ));
    }
}
