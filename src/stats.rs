use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use anyhow::ensure;
use uuid::Uuid;

use crate::grade::LiteralGrade;
use crate::models::{
    ClassroomGradeRecord, CourseGradeRecord, CourseRiskReport, CourseRiskRow, GradeCounts,
    GradePercentages, GradePerformanceRow, LiteralDistribution, ProblemRate, RiskBreakdown,
    School, SchoolDistributionRow, SchoolGradeCount, Scope, StudentCourseAverage,
};

/// Students averaging below this on the 1-4 scale count as at risk.
pub const AT_RISK_BELOW: f64 = 3.0;
/// At-risk students below this fall in the C range, the rest in the B range.
pub const C_RANGE_BELOW: f64 = 2.0;

/// Cohort filter and output cap for the course risk ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskPolicy {
    pub min_cohort: i64,
    pub max_rows: usize,
}

impl RiskPolicy {
    pub const SYSTEM_WIDE: RiskPolicy = RiskPolicy {
        min_cohort: 5,
        max_rows: 10,
    };
    pub const SCHOOL: RiskPolicy = RiskPolicy {
        min_cohort: 3,
        max_rows: 5,
    };

    pub fn for_scope(scope: &Scope) -> Self {
        match scope {
            Scope::Global => RiskPolicy::SYSTEM_WIDE,
            Scope::School(_) => RiskPolicy::SCHOOL,
        }
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub fn percentage(count: i64, total: i64, decimals: i32) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    round_to(count as f64 / total as f64 * 100.0, decimals)
}

pub fn distribution(counts: GradeCounts) -> LiteralDistribution {
    let total = counts.total();
    LiteralDistribution {
        counts,
        total,
        percentages: GradePercentages {
            ad: percentage(counts.ad, total, 1),
            a: percentage(counts.a, total, 1),
            b: percentage(counts.b, total, 1),
            c: percentage(counts.c, total, 1),
        },
    }
}

fn ordinal_sum(counts: &GradeCounts) -> i64 {
    LiteralGrade::ALL
        .iter()
        .map(|grade| counts.get(*grade) * i64::from(grade.ordinal()))
        .sum()
}

pub fn zero_school_row(school: &School) -> SchoolDistributionRow {
    SchoolDistributionRow {
        school_id: school.id,
        school_name: school.name.clone(),
        distribution: LiteralDistribution::default(),
    }
}

/// One row per school that has at least one qualifying grade, ordered by name.
pub fn school_distribution_rows(counts: &[SchoolGradeCount]) -> Vec<SchoolDistributionRow> {
    let grouped = counts
        .iter()
        .filter(|row| row.count > 0)
        .filter_map(|row| LiteralGrade::parse(&row.grade).map(|grade| (row, grade)))
        .fold(
            BTreeMap::<(String, Uuid), GradeCounts>::new(),
            |mut acc, (row, grade)| {
                acc.entry((row.school_name.clone(), row.school_id))
                    .or_default()
                    .add(grade, row.count);
                acc
            },
        );

    grouped
        .into_iter()
        .map(|((school_name, school_id), counts)| SchoolDistributionRow {
            school_id,
            school_name,
            distribution: distribution(counts),
        })
        .collect()
}

pub fn global_summary(rows: &[SchoolDistributionRow]) -> LiteralDistribution {
    let counts = rows
        .iter()
        .map(|row| row.distribution.counts)
        .fold(GradeCounts::default(), GradeCounts::merge);
    distribution(counts)
}

#[derive(Default)]
struct ClassroomGroup {
    students: BTreeSet<Uuid>,
    counts: GradeCounts,
}

/// Performance per classroom grade and level, ordered by level then grade.
///
/// Category percentages are relative to grade records, not to students.
pub fn grade_performance(records: &[ClassroomGradeRecord]) -> Vec<GradePerformanceRow> {
    let grouped = records
        .iter()
        .filter_map(|record| LiteralGrade::parse(&record.grade).map(|grade| (record, grade)))
        .fold(
            BTreeMap::<(String, String), ClassroomGroup>::new(),
            |mut acc, (record, grade)| {
                let group = acc
                    .entry((record.level_name.clone(), record.classroom_grade.clone()))
                    .or_default();
                group.students.insert(record.student_id);
                group.counts.add(grade, 1);
                acc
            },
        );

    grouped
        .into_iter()
        .map(|((level, grade), group)| {
            let total = group.counts.total();
            let average = round_to(ordinal_sum(&group.counts) as f64 / total as f64, 2);
            GradePerformanceRow {
                label: format!("{grade}° {level}"),
                grade,
                level,
                student_count: group.students.len() as i64,
                distribution: distribution(group.counts),
                average,
                literal_average: LiteralGrade::from_average(average),
            }
        })
        .collect()
}

struct StudentCourseTally<'a> {
    course_name: &'a str,
    level_name: &'a str,
    sum: i64,
    count: i64,
}

/// First stage of the risk ranking: mean ordinal per (course, student).
pub fn student_course_averages(records: &[CourseGradeRecord]) -> Vec<StudentCourseAverage> {
    let grouped = records
        .iter()
        .filter_map(|record| LiteralGrade::parse(&record.grade).map(|grade| (record, grade)))
        .fold(
            BTreeMap::<(Uuid, Uuid), StudentCourseTally>::new(),
            |mut acc, (record, grade)| {
                let tally = acc
                    .entry((record.course_id, record.student_id))
                    .or_insert_with(|| StudentCourseTally {
                        course_name: &record.course_name,
                        level_name: &record.level_name,
                        sum: 0,
                        count: 0,
                    });
                tally.sum += i64::from(grade.ordinal());
                tally.count += 1;
                acc
            },
        );

    grouped
        .into_iter()
        .map(|((course_id, student_id), tally)| StudentCourseAverage {
            course_id,
            course_name: tally.course_name.to_string(),
            level_name: tally.level_name.to_string(),
            student_id,
            average: tally.sum as f64 / tally.count as f64,
        })
        .collect()
}

pub fn classify(averages: &[f64]) -> (i64, RiskBreakdown) {
    averages
        .iter()
        .filter(|avg| **avg < AT_RISK_BELOW)
        .fold((0, RiskBreakdown::default()), |(at_risk, mut breakdown), avg| {
            if *avg < C_RANGE_BELOW {
                breakdown.c_range += 1;
            } else {
                breakdown.b_range += 1;
            }
            (at_risk + 1, breakdown)
        })
}

fn by_risk_desc(left: &CourseRiskRow, right: &CourseRiskRow) -> Ordering {
    right
        .risk_pct
        .partial_cmp(&left.risk_pct)
        .unwrap_or(Ordering::Equal)
        .then_with(|| left.course_name.cmp(&right.course_name))
        .then_with(|| left.course_id.cmp(&right.course_id))
}

/// Second stage: one row per course meeting the cohort size, highest risk first.
///
/// Returns the capped rows and how many courses met the cohort size.
pub fn rank_courses(
    averages: &[StudentCourseAverage],
    policy: RiskPolicy,
) -> anyhow::Result<(Vec<CourseRiskRow>, usize)> {
    let grouped = averages.iter().fold(
        BTreeMap::<Uuid, Vec<&StudentCourseAverage>>::new(),
        |mut acc, avg| {
            acc.entry(avg.course_id).or_default().push(avg);
            acc
        },
    );

    let mut rows = Vec::new();
    for (course_id, students) in grouped {
        let total_students = students.len() as i64;
        if total_students < policy.min_cohort {
            continue;
        }
        let values: Vec<f64> = students.iter().map(|s| s.average).collect();
        ensure!(
            values.iter().all(|v| v.is_finite()),
            "non-finite student average in course {course_id}"
        );
        let (at_risk, breakdown) = classify(&values);
        rows.push(CourseRiskRow {
            course_id,
            course_name: students[0].course_name.clone(),
            level_name: students[0].level_name.clone(),
            total_students,
            at_risk,
            risk_pct: percentage(at_risk, total_students, 2),
            breakdown,
        });
    }

    let analyzed = rows.len();
    rows.sort_by(by_risk_desc);
    rows.truncate(policy.max_rows);
    Ok((rows, analyzed))
}

pub fn mean_risk(rows: &[CourseRiskRow]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let sum: f64 = rows.iter().map(|row| row.risk_pct).sum();
    round_to(sum / rows.len() as f64, 2)
}

pub fn course_risk(
    records: &[CourseGradeRecord],
    scope: &Scope,
    total_courses: i64,
) -> anyhow::Result<CourseRiskReport> {
    let policy = RiskPolicy::for_scope(scope);
    let averages = student_course_averages(records);
    let (courses, analyzed_courses) = rank_courses(&averages, policy)?;
    let rate = mean_risk(&courses);
    let problem_rate = match scope {
        Scope::Global => ProblemRate::Global(rate),
        Scope::School(_) => ProblemRate::Local(rate),
    };

    Ok(CourseRiskReport {
        courses,
        analyzed_courses,
        total_courses,
        problem_rate,
    })
}
