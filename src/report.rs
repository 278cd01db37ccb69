use std::collections::HashMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::Student;
use crate::risk::{RiskThresholds, RiskTier};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub unknown: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramSummary {
    pub program: String,
    pub count: usize,
    pub scored: usize,
    pub avg_risk: Option<f64>,
}

pub fn tier_distribution(students: &[Student], thresholds: &RiskThresholds) -> TierDistribution {
    let mut distribution = TierDistribution::default();
    for student in students {
        match thresholds.classify(student.risk_score) {
            RiskTier::High => distribution.high += 1,
            RiskTier::Medium => distribution.medium += 1,
            RiskTier::Low => distribution.low += 1,
            RiskTier::Unknown => distribution.unknown += 1,
        }
    }
    distribution
}

pub fn mean_risk(students: &[Student]) -> Option<f64> {
    let scores: Vec<f64> = students.iter().filter_map(|s| s.risk_score).collect();
    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

pub fn summarize_by_program(students: &[Student]) -> Vec<ProgramSummary> {
    let mut map: HashMap<String, (usize, usize, f64)> = HashMap::new();

    for student in students {
        let program = student
            .program
            .clone()
            .unwrap_or_else(|| "Unassigned".to_string());
        let entry = map.entry(program).or_insert((0, 0, 0.0));
        entry.0 += 1;
        if let Some(score) = student.risk_score {
            entry.1 += 1;
            entry.2 += score;
        }
    }

    let mut summaries: Vec<ProgramSummary> = map
        .into_iter()
        .map(|(program, (count, scored, total_risk))| ProgramSummary {
            program,
            count,
            scored,
            avg_risk: if scored == 0 {
                None
            } else {
                Some(total_risk / scored as f64)
            },
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.program.cmp(&b.program)));
    summaries
}

pub fn highest_risk(students: &[Student], limit: usize) -> Vec<&Student> {
    let mut scored: Vec<&Student> = students.iter().filter(|s| s.risk_score.is_some()).collect();
    scored.sort_by(|a, b| {
        b.risk_score
            .partial_cmp(&a.risk_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

pub fn build_report(
    scope: Option<&str>,
    generated_at: DateTime<Utc>,
    students: &[Student],
    thresholds: &RiskThresholds,
) -> String {
    let distribution = tier_distribution(students, thresholds);
    let programs = summarize_by_program(students);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all students");

    let _ = writeln!(output, "# PathKeepers Risk Overview");
    let _ = writeln!(
        output,
        "Generated for {} on {} ({} students)",
        scope_label,
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        students.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Tiers");
    let _ = writeln!(
        output,
        "- high (>= {:.2}): {}",
        thresholds.high, distribution.high
    );
    let _ = writeln!(
        output,
        "- medium (>= {:.2}): {}",
        thresholds.medium, distribution.medium
    );
    let _ = writeln!(output, "- low: {}", distribution.low);
    let _ = writeln!(output, "- unknown: {}", distribution.unknown);
    match mean_risk(students) {
        Some(mean) => {
            let _ = writeln!(output, "- mean risk score: {:.2}", mean);
        }
        None => {
            let _ = writeln!(output, "- mean risk score: n/a");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Programs");

    if programs.is_empty() {
        let _ = writeln!(output, "No students recorded.");
    } else {
        for summary in programs.iter() {
            let avg = summary
                .avg_risk
                .map(|avg| format!("{avg:.2}"))
                .unwrap_or_else(|| "n/a".to_string());
            let _ = writeln!(
                output,
                "- {}: {} students, {} scored (avg risk {})",
                summary.program, summary.count, summary.scored, avg
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Students");

    let top = highest_risk(students, 10);
    if top.is_empty() {
        let _ = writeln!(output, "No scored students.");
    } else {
        for student in top {
            let score = student.risk_score.unwrap_or_default();
            let _ = writeln!(
                output,
                "- {} ({}, {}) score {:.2} [{}]",
                student.name,
                student.student_code,
                student.email,
                score,
                thresholds.classify(student.risk_score)
            );
        }
    }

    let unscored: Vec<&Student> = students.iter().filter(|s| s.risk_score.is_none()).collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Awaiting Assessment");

    if unscored.is_empty() {
        let _ = writeln!(output, "Every student has a risk score.");
    } else {
        for student in unscored.iter().take(10) {
            let _ = writeln!(output, "- {} ({})", student.name, student.student_code);
        }
        if unscored.len() > 10 {
            let _ = writeln!(output, "- ...and {} more", unscored.len() - 10);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn sample_student(code: &str, program: Option<&str>, risk_score: Option<f64>) -> Student {
        Student {
            id: Uuid::new_v4(),
            student_code: code.to_string(),
            name: format!("Student {code}"),
            email: format!("{}@example.edu", code.to_lowercase()),
            program: program.map(str::to_string),
            year: Some(1),
            mentor_id: None,
            attendance_percent: None,
            cgpa: None,
            assignments_completed: None,
            assignments_total: None,
            subjects: Vec::new(),
            mentor_note: None,
            risk_score,
            last_risk_updated: None,
            last_academic_update: None,
            created_at: Utc::now(),
        }
    }

    fn cohort() -> Vec<Student> {
        vec![
            sample_student("S1", Some("BBA"), Some(0.8)),
            sample_student("S2", Some("BBA"), Some(0.4)),
            sample_student("S3", Some("B.Tech CSE"), Some(0.1)),
            sample_student("S4", None, None),
        ]
    }

    #[test]
    fn distribution_counts_each_tier() {
        let distribution = tier_distribution(&cohort(), &RiskThresholds::default());
        assert_eq!(
            distribution,
            TierDistribution {
                high: 1,
                medium: 1,
                low: 1,
                unknown: 1,
            }
        );
    }

    #[test]
    fn programs_average_only_scored_students() {
        let summaries = summarize_by_program(&cohort());
        assert_eq!(summaries[0].program, "BBA");
        assert_eq!(summaries[0].count, 2);
        let avg = summaries[0].avg_risk.unwrap();
        assert!((avg - 0.6).abs() < 1e-9);

        let unassigned = summaries
            .iter()
            .find(|s| s.program == "Unassigned")
            .unwrap();
        assert_eq!(unassigned.avg_risk, None);
    }

    #[test]
    fn highest_risk_orders_descending_and_skips_unscored() {
        let students = cohort();
        let top = highest_risk(&students, 2);
        let codes: Vec<&str> = top.iter().map(|s| s.student_code.as_str()).collect();
        assert_eq!(codes, vec!["S1", "S2"]);
    }

    #[test]
    fn report_includes_sections() {
        let report = build_report(Some("mentor view"), Utc::now(), &cohort(), &RiskThresholds::default());
        assert!(report.contains("# PathKeepers Risk Overview"));
        assert!(report.contains("Generated for mentor view"));
        assert!(report.contains("- high (>= 0.65): 1"));
        assert!(report.contains("Student S1 (S1, s1@example.edu) score 0.80 [high]"));
        assert!(report.contains("## Awaiting Assessment"));
        assert!(report.contains("- Student S4 (S4)"));
    }

    #[test]
    fn empty_report_has_placeholders() {
        let report = build_report(None, Utc::now(), &[], &RiskThresholds::default());
        assert!(report.contains("all students"));
        assert!(report.contains("mean risk score: n/a"));
        assert!(report.contains("No students recorded."));
        assert!(report.contains("No scored students."));
    }
}
