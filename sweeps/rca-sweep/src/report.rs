//! 扫描结果的人类可读报告.

use std::io::{self, Write};
use std::time::Duration;

use itertools::izip;
use rca_berry::rca::ResultTable;

/// 将 `table` 的报告写进 `w` 中.
pub fn describe_into<W: Write>(table: &ResultTable, elapsed: Duration, w: &mut W) -> io::Result<()> {
    writeln!(
        w,
        "RCA on {} with {} references ({} skipped)",
        table.subject,
        table.references.len(),
        table.skipped
    )?;

    // 前景 DSC 分布. 参考较多时压缩条形图长度.
    let bins = table.dice_histogram();
    let factor = if table.references.len() >= 50 { 2 } else { 1 };
    writeln!(w, "RCA DSC Distribution:")?;
    for (i, count) in bins.iter().enumerate() {
        writeln!(
            w,
            "{:.1} - {:.1}:\t{:3} {}",
            i as f64 / 10.0,
            (i + 1) as f64 / 10.0,
            count,
            ">".repeat(count / factor)
        )?;
    }
    writeln!(w)?;

    writeln!(
        w,
        "Predicted DSC:\t{:.6}\tAtlas: {}",
        table.predicted_dice().value,
        table.predicted_dice().atlas
    )?;
    writeln!(
        w,
        "Minimum MSD:\t{:.6}\tAtlas: {}",
        table.predicted_mean_sd().value,
        table.predicted_mean_sd().atlas
    )?;
    writeln!(
        w,
        "Minimum RMS:\t{:.6}\tAtlas: {}",
        table.predicted_rms_sd().value,
        table.predicted_rms_sd().atlas
    )?;
    writeln!(
        w,
        "Minimum HD:\t{:.6}\tAtlas: {}",
        table.predicted_hausdorff().value,
        table.predicted_hausdorff().atlas
    )?;

    if let Some(gt) = &table.ground_truth {
        writeln!(w, "\nReal DSC:\t{:.6}", gt.foreground_dice())?;
        writeln!(w, "Ground truth per class (label: DSC / MSD / RMS / HD):")?;
        let labels = table.mapping.iter().map(|(subject, _)| subject);
        for (label, d, msd, rms, hd) in
            izip!(labels, &gt.dice, &gt.mean_sd, &gt.rms_sd, &gt.hausdorff)
        {
            writeln!(w, "  {label}: {d:.4} / {msd:.3} / {rms:.3} / {hd:.3}")?;
        }
    }

    let secs = elapsed.as_secs();
    writeln!(
        w,
        "\nElapsed Time: {:02}h {:02}m {:02}s",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )?;
    Ok(())
}

/// 把报告打印到标准输出.
pub fn print(table: &ResultTable, elapsed: Duration) {
    let mut buf = Vec::with_capacity(1024);
    describe_into(table, elapsed, &mut buf).unwrap();
    print!("{}", std::str::from_utf8(&buf).unwrap());
}
