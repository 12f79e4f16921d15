use autoapply_engine::model::{ApplyLogEntry, LogStatus, Session};

/// Prints only what changed since the last snapshot.
#[derive(Default)]
pub struct ProgressPrinter {
    logs_seen: usize,
    last_step: Option<String>,
}

impl ProgressPrinter {
    pub fn print(&mut self, session: &Session) {
        if session.logs.len() > self.logs_seen {
            print_logs(&session.logs[self.logs_seen..]);
            self.logs_seen = session.logs.len();
        }
        if session.current_step != self.last_step {
            if let (Some(job), Some(step)) = (&session.current_job, &session.current_step) {
                println!("  ... {} ({})", job, step);
            }
            self.last_step = session.current_step.clone();
        }
    }
}

pub fn print_logs(logs: &[ApplyLogEntry]) {
    for entry in logs {
        let detail = entry
            .failure_reason
            .as_deref()
            .or(entry.skip_reason.as_deref())
            .unwrap_or("");
        let score = entry
            .match_score
            .map(|s| format!(" [{}]", s))
            .unwrap_or_default();
        println!(
            "{:<12} {} at {}{} {}",
            status_label(entry.status),
            entry.job_title,
            entry.company,
            score,
            detail
        );
    }
}

fn status_label(status: LogStatus) -> &'static str {
    match status {
        LogStatus::Applied => "applied",
        LogStatus::Skipped => "skipped",
        LogStatus::Failed => "failed",
        LogStatus::NeedsReview => "needs_review",
    }
}

pub fn summary(session: &Session) {
    let c = &session.counters;
    println!(
        "Session {}: {} (found {}, applied {}, skipped {}, failed {})",
        session.id, session.status, c.total_found, c.applied, c.skipped, c.failed
    );
    if let Some(error) = &session.last_error {
        println!("Last error: {}", error);
    }
}

/// One line per session for listings.
pub fn list_line(session: &Session) {
    println!("{}", list_entry(session));
}

fn list_entry(session: &Session) -> String {
    let c = &session.counters;
    format!(
        "{}  {}  {:<10} {:<24} applied {}/{}",
        session.id,
        session.started_at.format("%Y-%m-%d %H:%M"),
        session.status.as_str(),
        session.search.query,
        c.applied,
        session.max_applications
    )
}
