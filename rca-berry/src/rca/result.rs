//! 扫描结果表与汇总统计.

use ordered_float::NotNan;

use crate::metrics::{ClassMapping, MetricVector};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 一个成功注册的参考及其指标向量. 创建后不再修改.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReferenceResult {
    /// 参考 (atlas) 名.
    pub atlas: String,

    /// 该参考传播分割相对受测分割的指标向量.
    pub metrics: MetricVector,
}

/// 某个指标在某个类别槽位上的最优值与取得者.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BestEntry {
    /// 最优指标值.
    pub value: f64,

    /// 取得最优值的参考名.
    pub atlas: String,
}

/// 逐指标、逐类别槽位的最优汇总.
///
/// Dice 取最大, 距离类指标取最小. 并列时取首个遇到的参考
/// (与参考扫描顺序一致), 该约定是显式承诺而非实现巧合.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResultSummary {
    /// 各槽位的最大 Dice.
    pub max_dice: Vec<BestEntry>,

    /// 各槽位的最小平均表面距离.
    pub min_mean_sd: Vec<BestEntry>,

    /// 各槽位的最小均方根表面距离.
    pub min_rms_sd: Vec<BestEntry>,

    /// 各槽位的最小 Hausdorff 距离.
    pub min_hausdorff: Vec<BestEntry>,
}

/// 在一个槽位上按给定方向选出最优参考.
///
/// NaN 取值不参与竞争; 所有取值均为 NaN 时回退为首个参考.
/// 严格比较保证并列时首个遇到者获胜.
fn pick(
    references: &[ReferenceResult],
    slot: usize,
    values: fn(&MetricVector) -> &Vec<f64>,
    maximize: bool,
) -> BestEntry {
    let mut best: Option<(NotNan<f64>, &str)> = None;
    for r in references {
        let Ok(v) = NotNan::new(values(&r.metrics)[slot]) else {
            continue;
        };
        let better = match &best {
            None => true,
            Some((b, _)) => {
                if maximize {
                    v > *b
                } else {
                    v < *b
                }
            }
        };
        if better {
            best = Some((v, &r.atlas));
        }
    }

    match best {
        Some((v, atlas)) => BestEntry {
            value: v.into_inner(),
            atlas: atlas.to_string(),
        },
        None => BestEntry {
            value: f64::NAN,
            atlas: references[0].atlas.clone(),
        },
    }
}

/// 一个受测对象的完整 RCA 结果.
///
/// 参考顺序即注册顺序, 对分析无语义; 汇总在构造时一次算好,
/// 之后整表不再修改.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResultTable {
    /// 受测对象名.
    pub subject: String,

    /// 使用的类别映射.
    pub mapping: ClassMapping,

    /// 逐参考的结果.
    pub references: Vec<ReferenceResult>,

    /// 因错误被跳过的参考个数.
    pub skipped: usize,

    /// 逐指标、逐槽位的最优汇总.
    pub summary: ResultSummary,

    /// 真值分割与受测分割的直接比较 (不经注册). 仅在提供真值时存在.
    pub ground_truth: Option<MetricVector>,
}

impl ResultTable {
    /// 构造结果表并计算汇总.
    ///
    /// `references` 为空, 或任一指标向量长度与映射不符时 panic:
    /// 这是编排层必须先行排除的程序错误.
    pub fn new(
        subject: String,
        mapping: ClassMapping,
        references: Vec<ReferenceResult>,
        skipped: usize,
        ground_truth: Option<MetricVector>,
    ) -> Self {
        assert!(!references.is_empty(), "结果表至少需要一个参考");
        let slots = mapping.len() + 1;
        assert!(
            references.iter().all(|r| r.metrics.len() == slots),
            "指标向量长度与类别映射不符"
        );

        let mut summary = ResultSummary {
            max_dice: Vec::with_capacity(slots),
            min_mean_sd: Vec::with_capacity(slots),
            min_rms_sd: Vec::with_capacity(slots),
            min_hausdorff: Vec::with_capacity(slots),
        };
        for slot in 0..slots {
            summary.max_dice.push(pick(&references, slot, |m| &m.dice, true));
            summary.min_mean_sd.push(pick(&references, slot, |m| &m.mean_sd, false));
            summary.min_rms_sd.push(pick(&references, slot, |m| &m.rms_sd, false));
            summary.min_hausdorff.push(pick(&references, slot, |m| &m.hausdorff, false));
        }

        Self {
            subject,
            mapping,
            references,
            skipped,
            summary,
            ground_truth,
        }
    }

    /// RCA 预测的分割质量: 整体前景槽位的最大 Dice 及其参考.
    #[inline]
    pub fn predicted_dice(&self) -> &BestEntry {
        self.summary.max_dice.last().unwrap()
    }

    /// 整体前景槽位的最小平均表面距离及其参考.
    #[inline]
    pub fn predicted_mean_sd(&self) -> &BestEntry {
        self.summary.min_mean_sd.last().unwrap()
    }

    /// 整体前景槽位的最小均方根表面距离及其参考.
    #[inline]
    pub fn predicted_rms_sd(&self) -> &BestEntry {
        self.summary.min_rms_sd.last().unwrap()
    }

    /// 整体前景槽位的最小 Hausdorff 距离及其参考.
    #[inline]
    pub fn predicted_hausdorff(&self) -> &BestEntry {
        self.summary.min_hausdorff.last().unwrap()
    }

    /// 整体前景 Dice 在 [0, 1] 上按 0.1 步长的十桶分布.
    ///
    /// 取值 1.0 计入最后一桶; NaN 不计入任何桶.
    pub fn dice_histogram(&self) -> [usize; 10] {
        let mut bins = [0usize; 10];
        for r in &self.references {
            let d = r.metrics.foreground_dice();
            if d.is_nan() || !(0.0..=1.0).contains(&d) {
                continue;
            }
            let idx = ((d * 10.0) as usize).min(9);
            bins[idx] += 1;
        }
        bins
    }
}

/// 持久化部分. 结果表可无损往返于 JSON (可读) 与 bincode (紧凑).
#[cfg(feature = "serde")]
mod persist {
    use super::ResultTable;
    use std::fmt;
    use std::fs;
    use std::path::Path;

    /// 结果表持久化错误.
    #[derive(Debug)]
    pub enum PersistError {
        /// 底层 I/O 错误.
        Io(std::io::Error),

        /// JSON 编解码错误.
        Json(serde_json::Error),

        /// bincode 编解码错误.
        Bin(bincode::Error),
    }

    impl fmt::Display for PersistError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                PersistError::Io(e) => write!(f, "result I/O error: {e}"),
                PersistError::Json(e) => write!(f, "result JSON error: {e}"),
                PersistError::Bin(e) => write!(f, "result bincode error: {e}"),
            }
        }
    }

    impl std::error::Error for PersistError {}

    impl From<std::io::Error> for PersistError {
        fn from(value: std::io::Error) -> Self {
            Self::Io(value)
        }
    }

    impl ResultTable {
        /// 以带缩进的 JSON 形式保存结果表.
        pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), PersistError> {
            let text = serde_json::to_string_pretty(self).map_err(PersistError::Json)?;
            fs::write(path, text)?;
            Ok(())
        }

        /// 从 JSON 文件载入结果表.
        pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
            let text = fs::read_to_string(path)?;
            serde_json::from_str(&text).map_err(PersistError::Json)
        }

        /// 以紧凑二进制形式保存结果表.
        pub fn save_bin<P: AsRef<Path>>(&self, path: P) -> Result<(), PersistError> {
            let bytes = bincode::serialize(self).map_err(PersistError::Bin)?;
            fs::write(path, bytes)?;
            Ok(())
        }

        /// 从紧凑二进制文件载入结果表.
        pub fn load_bin<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
            let bytes = fs::read(path)?;
            bincode::deserialize(&bytes).map_err(PersistError::Bin)
        }
    }
}

#[cfg(feature = "serde")]
pub use persist::PersistError;

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(fg_dice: f64, fg_hd: f64) -> MetricVector {
        MetricVector {
            dice: vec![1.0, fg_dice],
            mean_sd: vec![0.0, fg_hd / 2.0],
            rms_sd: vec![0.0, fg_hd / 2.0],
            hausdorff: vec![0.0, fg_hd],
        }
    }

    fn table(fg_dices: &[(&str, f64, f64)]) -> ResultTable {
        let references = fg_dices
            .iter()
            .map(|(name, d, hd)| ReferenceResult {
                atlas: name.to_string(),
                metrics: vector(*d, *hd),
            })
            .collect();
        ResultTable::new(
            "subject".to_string(),
            ClassMapping::new(&[1], &[1]).unwrap(),
            references,
            0,
            None,
        )
    }

    /// 三个参考的前景 Dice [0.5, 0.9, 0.3]: 选中第二个.
    #[test]
    fn test_max_dice_selection() {
        let t = table(&[("r0", 0.5, 4.0), ("r1", 0.9, 1.0), ("r2", 0.3, 8.0)]);
        let best = t.predicted_dice();
        assert_eq!(best.atlas, "r1");
        assert_eq!(best.value, 0.9);

        let hd = t.predicted_hausdorff();
        assert_eq!(hd.atlas, "r1");
        assert_eq!(hd.value, 1.0);
    }

    /// 并列时首个遇到的参考获胜.
    #[test]
    fn test_tie_first_wins() {
        let t = table(&[("first", 0.7, 2.0), ("second", 0.7, 2.0)]);
        assert_eq!(t.predicted_dice().atlas, "first");
        assert_eq!(t.predicted_mean_sd().atlas, "first");
    }

    /// NaN 取值不参与竞争.
    #[test]
    fn test_nan_excluded() {
        let t = table(&[("bad", f64::NAN, f64::NAN), ("good", 0.4, 3.0)]);
        assert_eq!(t.predicted_dice().atlas, "good");
        assert_eq!(t.predicted_rms_sd().atlas, "good");
    }

    /// 直方图分桶: 1.0 计入最后一桶.
    #[test]
    fn test_dice_histogram() {
        let t = table(&[("a", 0.05, 1.0), ("b", 0.95, 1.0), ("c", 1.0, 0.0), ("d", 0.95, 1.0)]);
        let bins = t.dice_histogram();
        assert_eq!(bins[0], 1);
        assert_eq!(bins[9], 3);
        assert_eq!(bins.iter().sum::<usize>(), 4);
    }

    /// JSON 与 bincode 往返均无损.
    #[cfg(feature = "serde")]
    #[test]
    fn test_persist_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let t = table(&[("r0", 0.5, 4.0), ("r1", 0.9, 1.0)]);

        let json_path = dir.path().join("subject.json");
        t.save_json(&json_path).unwrap();
        assert_eq!(ResultTable::load_json(&json_path).unwrap(), t);

        let bin_path = dir.path().join("subject.bin");
        t.save_bin(&bin_path).unwrap();
        assert_eq!(ResultTable::load_bin(&bin_path).unwrap(), t);
    }
}
