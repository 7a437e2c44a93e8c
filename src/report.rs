use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{Complaint, CountBucket, TechnicianScore};

pub struct ReportInput<'a> {
    pub since_days: i64,
    pub cutoff: NaiveDate,
    pub by_status: &'a [CountBucket],
    pub by_severity: &'a [CountBucket],
    pub open: i64,
    pub unassigned: i64,
    pub recent: &'a [Complaint],
    pub technicians: &'a [TechnicianScore],
}

fn write_buckets(output: &mut String, buckets: &[CountBucket], empty: &str) {
    if buckets.is_empty() {
        let _ = writeln!(output, "{empty}");
        return;
    }
    let total: i64 = buckets.iter().map(|b| b.count).sum();
    for bucket in buckets {
        let share = if total == 0 {
            0.0
        } else {
            bucket.count as f64 * 100.0 / total as f64
        };
        let _ = writeln!(output, "- {}: {} ({:.0}%)", bucket.key, bucket.count, share);
    }
}

pub fn build_report(input: &ReportInput<'_>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Complaint Desk Report");
    let _ = writeln!(
        output,
        "Window: last {} days (since {})",
        input.since_days, input.cutoff
    );
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "Open complaints: {} ({} unassigned)",
        input.open, input.unassigned
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");
    write_buckets(&mut output, input.by_status, "No complaints recorded.");

    let _ = writeln!(output);
    let _ = writeln!(output, "## Severity Mix");
    write_buckets(&mut output, input.by_severity, "No complaints recorded.");

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Technicians");
    if input.technicians.is_empty() {
        let _ = writeln!(output, "No evaluations in this window.");
    } else {
        for score in input.technicians.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} score {:.2} (avg {:.2}) across {} evaluations",
                score.technician_name,
                score.score,
                score.average_rating,
                score.evaluation_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Complaints");
    if input.recent.is_empty() {
        let _ = writeln!(output, "No complaints opened in this window.");
    } else {
        for complaint in input.recent.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} [{} / {}] {}: {}",
                complaint.reference(),
                complaint.status,
                complaint.severity,
                complaint.customer_name,
                complaint.title
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::models::{ComplaintSource, ComplaintStatus, Severity};

    fn complaint() -> Complaint {
        Complaint {
            id: Uuid::new_v4(),
            number: 42,
            title: "No dial tone".to_string(),
            description: "Landline dead since Monday".to_string(),
            customer_name: "Maya Ibrahim".to_string(),
            customer_phone: None,
            customer_email: None,
            category: None,
            status: ComplaintStatus::InProgress,
            severity: Severity::High,
            source: ComplaintSource::Phone,
            assigned_to: None,
            technician_id: None,
            created_by: Uuid::new_v4(),
            resolution: None,
            resolved_at: None,
            closed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn report_lists_sections() {
        let by_status = vec![
            CountBucket { key: "new".into(), count: 3 },
            CountBucket { key: "closed".into(), count: 1 },
        ];
        let recent = vec![complaint()];
        let technicians = vec![TechnicianScore {
            technician_id: Uuid::new_v4(),
            technician_name: "Huda Aziz".into(),
            score: 4.5,
            average_rating: 4.25,
            evaluation_count: 4,
            detailed_count: 1,
            criteria: None,
        }];
        let input = ReportInput {
            since_days: 30,
            cutoff: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            by_status: &by_status,
            by_severity: &[],
            open: 3,
            unassigned: 1,
            recent: &recent,
            technicians: &technicians,
        };

        let report = build_report(&input);
        assert!(report.starts_with("# Complaint Desk Report"));
        assert!(report.contains("Open complaints: 3 (1 unassigned)"));
        assert!(report.contains("- new: 3 (75%)"));
        assert!(report.contains("## Severity Mix\nNo complaints recorded."));
        assert!(report.contains("Huda Aziz score 4.50"));
        assert!(report.contains("CMP-000042 [in_progress / high] Maya Ibrahim: No dial tone"));
    }

    #[test]
    fn empty_report_still_renders() {
        let input = ReportInput {
            since_days: 7,
            cutoff: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            by_status: &[],
            by_severity: &[],
            open: 0,
            unassigned: 0,
            recent: &[],
            technicians: &[],
        };
        let report = build_report(&input);
        assert!(report.contains("No evaluations in this window."));
        assert!(report.contains("No complaints opened in this window."));
    }
}
