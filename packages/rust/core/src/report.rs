//! Report rendering and output files.
//!
//! The synthesized body is wrapped in a header and a coverage section that
//! lists every source with its terminal status, so gaps stay visible even
//! when the synthesizer glosses over them. Files are written atomically
//! (temp file, then rename).

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, instrument};

use newsdesk_shared::{NewsdeskError, Result, StageError};

use crate::aggregate::{Coverage, SynthesisEntry, SynthesisInput};

/// Fixed report wording. The synthesized body is written in the target
/// language, so the surrounding labels follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLabels {
    pub title: &'static str,
    pub generated: &'static str,
    pub run: &'static str,
    pub sources: &'static str,
    pub complete: &'static str,
    pub degraded: &'static str,
    pub partial_up_to: &'static str,
    pub absent: &'static str,
    pub coverage: &'static str,
    pub success_rate: &'static str,
    pub synthesis_failed: &'static str,
    pub failure_note: &'static str,
}

const EN_LABELS: ReportLabels = ReportLabels {
    title: "News Report",
    generated: "Generated",
    run: "Run",
    sources: "Sources",
    complete: "complete",
    degraded: "degraded",
    partial_up_to: "partial, output up to",
    absent: "absent",
    coverage: "Source coverage",
    success_rate: "Success rate",
    synthesis_failed: "Synthesis failed",
    failure_note: "The per-source results were collected but could not be combined into a report.",
};

const ZH_LABELS: ReportLabels = ReportLabels {
    title: "综合新闻报告",
    generated: "生成时间",
    run: "运行编号",
    sources: "新闻源",
    complete: "完整",
    degraded: "降级",
    partial_up_to: "部分完成，输出截至",
    absent: "缺失",
    coverage: "新闻源覆盖情况",
    success_rate: "成功率",
    synthesis_failed: "综合分析失败",
    failure_note: "各新闻源的结果已收集，但未能整合成报告。",
};

impl ReportLabels {
    /// Labels for a language tag. Chinese tags (`zh`, `zh-CN`, ...) get
    /// Chinese labels; everything else falls back to English.
    pub fn for_language(language: &str) -> Self {
        let primary = language.split(['-', '_']).next().unwrap_or_default();
        if primary.eq_ignore_ascii_case("zh") {
            ZH_LABELS
        } else {
            EN_LABELS
        }
    }
}

/// `news_report_<YYYYmmdd_HHMMSS>.md`
pub fn report_file_name(generated_at: NaiveDateTime) -> String {
    format!("news_report_{}.md", generated_at.format("%Y%m%d_%H%M%S"))
}

/// `news_aggregate_<YYYYmmdd_HHMMSS>.json`, written when synthesis is skipped.
pub fn aggregate_file_name(generated_at: NaiveDateTime) -> String {
    format!("news_aggregate_{}.json", generated_at.format("%Y%m%d_%H%M%S"))
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Full report: header, synthesized body, coverage section.
pub fn render(
    input: &SynthesisInput,
    body: &str,
    generated_at: NaiveDateTime,
    labels: &ReportLabels,
) -> String {
    let mut out = header(input, generated_at, labels);
    out.push_str(body.trim());
    out.push_str("\n\n");
    out.push_str(&coverage_section(input, labels));
    out
}

/// Report written when synthesis itself failed. Still lists coverage.
pub fn render_failure(
    input: &SynthesisInput,
    error: &StageError,
    generated_at: NaiveDateTime,
    labels: &ReportLabels,
) -> String {
    let mut out = header(input, generated_at, labels);
    let _ = writeln!(out, "## {}\n", labels.synthesis_failed);
    let _ = writeln!(out, "{}: {}\n", error.kind, error.message);
    let _ = writeln!(out, "{}\n", labels.failure_note);
    out.push_str(&coverage_section(input, labels));
    out
}

fn header(input: &SynthesisInput, generated_at: NaiveDateTime, labels: &ReportLabels) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", labels.title);
    let _ = writeln!(
        out,
        "- {}: {}",
        labels.generated,
        generated_at.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "- {}: {}", labels.run, input.run_id);
    let _ = writeln!(
        out,
        "- {}: {} ({} {}, {} {})\n",
        labels.sources,
        input.stats.total,
        input.stats.completed,
        labels.complete,
        input.stats.degraded,
        labels.degraded
    );
    out.push_str("---\n\n");
    out
}

fn coverage_section(input: &SynthesisInput, labels: &ReportLabels) -> String {
    let mut out = format!("---\n\n## {}\n\n", labels.coverage);
    for entry in &input.entries {
        let _ = writeln!(out, "- {}", coverage_line(entry, labels));
    }
    let _ = writeln!(
        out,
        "\n{}: {:.1}%",
        labels.success_rate,
        input.stats.success_rate * 100.0
    );
    out
}

fn coverage_line(entry: &SynthesisEntry, labels: &ReportLabels) -> String {
    let name = format!("**{}** ({}, {})", entry.source, entry.kind, entry.url);
    match &entry.coverage {
        Coverage::Complete { .. } => format!("{name}: {}", labels.complete),
        Coverage::Partial {
            missing_beyond,
            reason,
            detail,
            ..
        } => format!(
            "{name}: {} {missing_beyond} ({reason}: {detail})",
            labels.partial_up_to
        ),
        Coverage::Absent { reason, detail } => {
            format!("{name}: {} ({reason}: {detail})", labels.absent)
        }
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write `contents` to `dir/name` through a temp file and a rename.
#[instrument(skip_all, fields(dir = %dir.display(), name))]
pub fn write_atomic(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| NewsdeskError::io(dir, e))?;

    let target = dir.join(name);
    let temp = dir.join(format!(".{name}.tmp"));
    replace_via_temp(&temp, &target, |path| std::fs::write(path, contents))?;

    debug!(path = %target.display(), size = contents.len(), "wrote file");
    Ok(target)
}

/// Run `write` against `temp`, then rename it over `target`. The temp file
/// is removed whenever either step fails.
fn replace_via_temp(
    temp: &Path,
    target: &Path,
    write: impl FnOnce(&Path) -> std::io::Result<()>,
) -> Result<()> {
    if let Err(e) = write(temp) {
        let _ = std::fs::remove_file(temp);
        return Err(NewsdeskError::io(temp, e));
    }
    if let Err(e) = std::fs::rename(temp, target) {
        let _ = std::fs::remove_file(temp);
        return Err(NewsdeskError::io(target, e));
    }
    Ok(())
}

/// Write a rendered report into `dir`.
pub fn write_report(dir: &Path, report: &str, generated_at: NaiveDateTime) -> Result<PathBuf> {
    write_atomic(dir, &report_file_name(generated_at), report)
}

/// Write the aggregated input as pretty JSON into `dir`.
pub fn write_aggregate(
    dir: &Path,
    input: &SynthesisInput,
    generated_at: NaiveDateTime,
) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(input)
        .map_err(|e| NewsdeskError::Conversion(format!("failed to serialize aggregate: {e}")))?;
    write_atomic(dir, &aggregate_file_name(generated_at), &json)
}
