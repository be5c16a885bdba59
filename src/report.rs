use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{
    CourseRiskReport, GradePerformanceReport, LiteralDistribution, ProblemRate,
    SchoolDistributionReport,
};

fn header(output: &mut String, title: &str, scope_label: &str, generated: DateTime<Utc>) {
    let _ = writeln!(output, "# {title}");
    let _ = writeln!(
        output,
        "Generated for {} at {}",
        scope_label,
        generated.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
}

fn distribution_line(dist: &LiteralDistribution) -> String {
    format!(
        "{} grades | AD {} ({:.1}%) | A {} ({:.1}%) | B {} ({:.1}%) | C {} ({:.1}%)",
        dist.total,
        dist.counts.ad,
        dist.percentages.ad,
        dist.counts.a,
        dist.percentages.a,
        dist.counts.b,
        dist.percentages.b,
        dist.counts.c,
        dist.percentages.c
    )
}

pub fn render_distribution(
    report: &SchoolDistributionReport,
    scope_label: &str,
    generated: DateTime<Utc>,
) -> String {
    let mut output = String::new();
    header(&mut output, "Achievement Distribution", scope_label, generated);

    match report {
        SchoolDistributionReport::Global {
            schools,
            total_schools,
            total_grades_global,
            summary,
        } => {
            let _ = writeln!(output, "## Summary");
            let _ = writeln!(
                output,
                "{} schools, {} grades recorded",
                total_schools, total_grades_global
            );
            let _ = writeln!(output, "- {}", distribution_line(summary));
            let _ = writeln!(output);
            let _ = writeln!(output, "## By School");
            if schools.is_empty() {
                let _ = writeln!(output, "No schools registered.");
            }
            for row in schools {
                let _ = writeln!(
                    output,
                    "- {}: {}",
                    row.school_name,
                    distribution_line(&row.distribution)
                );
            }
        }
        SchoolDistributionReport::School(row) => {
            let _ = writeln!(output, "## {}", row.school_name);
            let _ = writeln!(output, "- {}", distribution_line(&row.distribution));
        }
    }

    output
}

pub fn render_course_risk(
    report: &CourseRiskReport,
    scope_label: &str,
    generated: DateTime<Utc>,
) -> String {
    let mut output = String::new();
    header(&mut output, "Courses With Most Students At Risk", scope_label, generated);

    let rate_label = match report.problem_rate {
        ProblemRate::Global(_) => "Global average problem rate",
        ProblemRate::Local(_) => "Local average problem rate",
    };
    let _ = writeln!(
        output,
        "{}: {:.2}% ({} of {} courses met the cohort size)",
        rate_label,
        report.problem_rate.value(),
        report.analyzed_courses,
        report.total_courses
    );
    let _ = writeln!(output);

    if report.courses.is_empty() {
        let _ = writeln!(output, "No course has enough graded students to rank.");
        return output;
    }

    for (rank, row) in report.courses.iter().enumerate() {
        let _ = writeln!(
            output,
            "{}. {} ({}): {} of {} students at risk ({:.2}%), B range {}, C range {}",
            rank + 1,
            row.course_name,
            row.level_name,
            row.at_risk,
            row.total_students,
            row.risk_pct,
            row.breakdown.b_range,
            row.breakdown.c_range
        );
    }

    output
}

pub fn render_performance(
    report: &GradePerformanceReport,
    scope_label: &str,
    generated: DateTime<Utc>,
) -> String {
    let mut output = String::new();
    header(&mut output, "Performance By Grade", scope_label, generated);

    if report.rows.is_empty() {
        let _ = writeln!(output, "No grades recorded for this school.");
        return output;
    }

    for row in &report.rows {
        let literal = row
            .literal_average
            .map(|grade| grade.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            output,
            "- {}: {} students, average {:.2} ({}), {}",
            row.label,
            row.student_count,
            row.average,
            literal,
            distribution_line(&row.distribution)
        );
    }

    output
}
