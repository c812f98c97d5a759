use std::time::Duration;

use chrono::{Local, TimeZone};

use crate::core::event::Progress;
use crate::core::job::{Job, Task};
use crate::core::summary::RunReport;

pub fn format_progress_line(progress: &Progress) -> String {
    format!(
        "{}  (ok={} failed={})",
        progress.message, progress.success, progress.fail
    )
}

pub fn format_report_line(report: &RunReport) -> String {
    let mut line = format!(
        "Task {} {:?}: {} sent ok, {} failed, {} pending (paced {}, paused {})",
        report.task_id,
        report.state,
        report.success,
        report.fail,
        report.pending(),
        format_duration(report.paced),
        format_duration(report.paused),
    );
    if report.carried_over > 0 {
        line.push_str(&format!(", {} carried over", report.carried_over));
    }
    if report.is_degraded() {
        line.push_str(&format!(", {} store writes failed", report.write_failures));
    }
    line
}

pub fn format_task_line(task: &Task) -> String {
    format!(
        "#{:<5} {:<9} {:>4} total  {:>4} ok  {:>4} failed  every {}s via {}  {}  {}",
        task.id,
        task.status,
        task.total,
        task.success,
        task.fail,
        task.interval_secs,
        task.channel,
        format_timestamp(task.created_at),
        preview(&task.body, 32),
    )
}

pub fn format_job_line(job: &Job) -> String {
    let sent_at = job
        .sent_at
        .map(format_timestamp)
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<6} {:<7} {:<16} {:<20} {}",
        job.id, job.status, job.address, job.recipient_name, sent_at
    )
}

/// Rough wall time for `count` sends paced `interval_secs` apart.
pub fn format_estimate(count: usize, interval_secs: u32) -> String {
    let secs = count as u64 * u64::from(interval_secs);
    if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

pub fn format_timestamp(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

fn preview(body: &str, max_chars: usize) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::control::RunState;

    #[test]
    fn estimate_switches_to_minutes() {
        assert_eq!(format_estimate(10, 3), "30s");
        assert_eq!(format_estimate(50, 3), "2m30s");
        assert_eq!(format_estimate(0, 5), "0s");
    }

    #[test]
    fn duration_is_zero_padded() {
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
    }

    #[test]
    fn preview_truncates_long_bodies() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdefghijkl", 4), "abcd…");
    }

    #[test]
    fn report_line_mentions_degraded_runs() {
        let report = RunReport {
            task_id: 7,
            state: RunState::Cancelled,
            total: 5,
            processed: 2,
            success: 1,
            fail: 1,
            carried_over: 0,
            sent: 2,
            write_failures: 1,
            paced: Duration::from_secs(3),
            paused: Duration::ZERO,
        };
        let line = format_report_line(&report);
        assert!(line.starts_with("Task 7 Cancelled: 1 sent ok, 1 failed, 3 pending"), "{line}");
        assert!(line.ends_with("1 store writes failed"), "{line}");
    }
}
