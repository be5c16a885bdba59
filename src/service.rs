use std::fmt;

use anyhow::Context;
use tracing::{debug, error};

use crate::models::{
    CourseRiskReport, GradePerformanceReport, SchoolDistributionReport, SchoolId, Scope,
};
use crate::source::GradeSource;
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    SchoolDistribution,
    CourseRisk,
    GradePerformance,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReportKind::SchoolDistribution => "school distribution",
            ReportKind::CourseRisk => "course risk",
            ReportKind::GradePerformance => "grade performance",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("could not compute {report} for {scope}")]
    AggregationFailed {
        report: ReportKind,
        scope: Scope,
        #[source]
        source: anyhow::Error,
    },
}

impl StatsError {
    pub fn report(&self) -> ReportKind {
        match self {
            StatsError::AggregationFailed { report, .. } => *report,
        }
    }
}

/// Computes dashboard statistics from a grade source. Holds no state between calls.
pub struct StatisticsService<S> {
    source: S,
}

impl<S: GradeSource> StatisticsService<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub async fn get_school_distribution(
        &self,
        school: Option<SchoolId>,
    ) -> Result<SchoolDistributionReport, StatsError> {
        let scope = Scope::from_school(school);
        let result = self.school_distribution(&scope).await;
        self.finish(ReportKind::SchoolDistribution, scope, result)
    }

    pub async fn get_course_risk(
        &self,
        school: Option<SchoolId>,
    ) -> Result<CourseRiskReport, StatsError> {
        let scope = Scope::from_school(school);
        let result = self.course_risk(&scope).await;
        self.finish(ReportKind::CourseRisk, scope, result)
    }

    pub async fn get_grade_performance(
        &self,
        school: SchoolId,
    ) -> Result<GradePerformanceReport, StatsError> {
        let scope = Scope::School(school);
        let result = self.grade_performance(school).await;
        self.finish(ReportKind::GradePerformance, scope, result)
    }

    fn finish<T>(
        &self,
        report: ReportKind,
        scope: Scope,
        result: anyhow::Result<T>,
    ) -> Result<T, StatsError> {
        result.map_err(|source| {
            error!(
                report = %report,
                scope = %scope,
                backend = self.source.backend_tag(),
                error = ?source,
                "aggregation failed"
            );
            StatsError::AggregationFailed {
                report,
                scope,
                source,
            }
        })
    }

    async fn school_distribution(&self, scope: &Scope) -> anyhow::Result<SchoolDistributionReport> {
        let record_count = self
            .source
            .count_grade_records(scope)
            .await
            .context("counting grade records")?;

        if record_count == 0 {
            debug!(scope = %scope, "no grade records, returning zero rows");
            let schools = self.source.schools(scope).await.context("listing schools")?;
            return match scope {
                Scope::Global => Ok(SchoolDistributionReport::Global {
                    schools: schools.iter().map(stats::zero_school_row).collect(),
                    total_schools: schools.len() as i64,
                    total_grades_global: 0,
                    summary: stats::distribution(Default::default()),
                }),
                Scope::School(id) => {
                    let school = schools
                        .into_iter()
                        .find(|school| school.id == *id)
                        .with_context(|| format!("school {id} not found"))?;
                    Ok(SchoolDistributionReport::School(stats::zero_school_row(&school)))
                }
            };
        }

        let counts = self
            .source
            .school_grade_counts(scope)
            .await
            .context("grouping grade counts by school")?;
        let rows = stats::school_distribution_rows(&counts);
        debug!(scope = %scope, records = record_count, schools = rows.len(), "grouped grades by school");

        match scope {
            Scope::Global => {
                let summary = stats::global_summary(&rows);
                let total_schools = self.source.count_schools().await.context("counting schools")?;
                Ok(SchoolDistributionReport::Global {
                    total_grades_global: summary.total,
                    schools: rows,
                    total_schools,
                    summary,
                })
            }
            Scope::School(id) => match rows.into_iter().next() {
                Some(row) => Ok(SchoolDistributionReport::School(row)),
                None => {
                    let school = self
                        .source
                        .schools(scope)
                        .await
                        .context("listing schools")?
                        .into_iter()
                        .next()
                        .with_context(|| format!("school {id} not found"))?;
                    Ok(SchoolDistributionReport::School(stats::zero_school_row(&school)))
                }
            },
        }
    }

    async fn course_risk(&self, scope: &Scope) -> anyhow::Result<CourseRiskReport> {
        let total_courses = self
            .source
            .count_courses(scope)
            .await
            .context("counting courses")?;
        let records = self
            .source
            .course_grade_records(scope)
            .await
            .context("loading course grade records")?;

        let report = stats::course_risk(&records, scope, total_courses)?;
        debug!(
            scope = %scope,
            records = records.len(),
            analyzed = report.analyzed_courses,
            reported = report.courses.len(),
            "ranked courses by risk"
        );
        Ok(report)
    }

    async fn grade_performance(&self, school: SchoolId) -> anyhow::Result<GradePerformanceReport> {
        let records = self
            .source
            .classroom_grade_records(school)
            .await
            .context("loading classroom grade records")?;
        let rows = stats::grade_performance(&records);
        debug!(school = %school, records = records.len(), rows = rows.len(), "grouped grades by classroom");

        Ok(GradePerformanceReport {
            total_rows: rows.len(),
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ClassroomGradeRecord, CourseGradeRecord, FlatGradeRecord, ProblemRate, School,
        SchoolGradeCount,
    };
    use crate::source::tests::flat;
    use crate::source::MemorySource;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct BrokenSource;

    #[async_trait]
    impl GradeSource for BrokenSource {
        fn backend_tag(&self) -> &'static str {
            "broken"
        }
        async fn count_grade_records(&self, _scope: &Scope) -> anyhow::Result<i64> {
            Ok(12)
        }
        async fn count_schools(&self) -> anyhow::Result<i64> {
            Ok(1)
        }
        async fn schools(&self, _scope: &Scope) -> anyhow::Result<Vec<School>> {
            Ok(Vec::new())
        }
        async fn school_grade_counts(&self, _scope: &Scope) -> anyhow::Result<Vec<SchoolGradeCount>> {
            anyhow::bail!("connection reset")
        }
        async fn classroom_grade_records(
            &self,
            _school: SchoolId,
        ) -> anyhow::Result<Vec<ClassroomGradeRecord>> {
            anyhow::bail!("connection reset")
        }
        async fn course_grade_records(&self, _scope: &Scope) -> anyhow::Result<Vec<CourseGradeRecord>> {
            anyhow::bail!("connection reset")
        }
        async fn count_courses(&self, _scope: &Scope) -> anyhow::Result<i64> {
            Ok(3)
        }
    }

    fn scenario_a_school(id: SchoolId) -> Vec<FlatGradeRecord> {
        let course = Uuid::new_v4();
        [("AD", 5), ("A", 10), ("B", 3), ("C", 2)]
            .iter()
            .flat_map(|(grade, n)| {
                (0..*n).map(move |_| {
                    flat(
                        (id, "San Martín"),
                        Uuid::new_v4(),
                        ("3", "Primaria"),
                        (course, "Matemática"),
                        grade,
                    )
                })
            })
            .collect()
    }

    fn course_with_averages(
        school: SchoolId,
        course: (Uuid, &str),
        students: &[&[&str]],
    ) -> Vec<FlatGradeRecord> {
        students
            .iter()
            .flat_map(|grades| {
                let student = Uuid::new_v4();
                grades.iter().map(move |grade| {
                    flat((school, "Los Andes"), student, ("4", "Primaria"), course, grade)
                })
            })
            .collect()
    }

    #[tokio::test]
    async fn school_distribution_for_one_school() {
        let id = Uuid::new_v4();
        let service = StatisticsService::new(MemorySource::new(scenario_a_school(id)));

        let report = service.get_school_distribution(Some(id)).await.unwrap();
        let SchoolDistributionReport::School(row) = report else {
            panic!("expected single school row");
        };
        assert_eq!(row.distribution.total, 20);
        assert_eq!(row.distribution.percentages.ad, 25.0);
        assert_eq!(row.distribution.percentages.a, 50.0);
        assert_eq!(row.distribution.percentages.b, 15.0);
        assert_eq!(row.distribution.percentages.c, 10.0);
    }

    #[tokio::test]
    async fn empty_dataset_lists_every_school() {
        let source = MemorySource::default()
            .with_school(Uuid::new_v4(), "Norte")
            .with_school(Uuid::new_v4(), "Sur");
        let service = StatisticsService::new(source);

        let report = service.get_school_distribution(None).await.unwrap();
        let SchoolDistributionReport::Global {
            schools,
            total_schools,
            total_grades_global,
            summary,
        } = report
        else {
            panic!("expected global report");
        };
        assert_eq!(schools.len(), 2);
        assert_eq!(total_schools, 2);
        assert_eq!(total_grades_global, 0);
        assert_eq!(summary.total, 0);
        assert!(schools
            .iter()
            .all(|row| row.distribution.total == 0 && row.distribution.percentages.sum() == 0.0));
    }

    #[tokio::test]
    async fn non_empty_dataset_omits_schools_without_grades() {
        let graded = Uuid::new_v4();
        let source = MemorySource::new(scenario_a_school(graded)).with_school(Uuid::new_v4(), "Vacío");
        let service = StatisticsService::new(source);

        let report = service.get_school_distribution(None).await.unwrap();
        let SchoolDistributionReport::Global {
            schools,
            total_schools,
            total_grades_global,
            ..
        } = report
        else {
            panic!("expected global report");
        };
        assert_eq!(schools.len(), 1);
        assert_eq!(schools[0].school_id, graded);
        assert_eq!(total_schools, 2);
        assert_eq!(total_grades_global, 20);
    }

    #[tokio::test]
    async fn empty_school_gets_zero_row() {
        let id = Uuid::new_v4();
        let service = StatisticsService::new(MemorySource::default().with_school(id, "Norte"));

        let report = service.get_school_distribution(Some(id)).await.unwrap();
        let SchoolDistributionReport::School(row) = report else {
            panic!("expected single school row");
        };
        assert_eq!(row.school_name, "Norte");
        assert_eq!(row.distribution.total, 0);
    }

    #[tokio::test]
    async fn ungraded_school_gets_zero_row_while_others_have_grades() {
        let graded = Uuid::new_v4();
        let empty = Uuid::new_v4();
        let source = MemorySource::new(scenario_a_school(graded)).with_school(empty, "Vacío");
        let service = StatisticsService::new(source);

        let report = service.get_school_distribution(Some(empty)).await.unwrap();
        let SchoolDistributionReport::School(row) = report else {
            panic!("expected single school row");
        };
        assert_eq!(row.school_id, empty);
        assert_eq!(row.school_name, "Vacío");
        assert_eq!(row.distribution.total, 0);
        assert_eq!(row.distribution.percentages.sum(), 0.0);
    }

    #[tokio::test]
    async fn lowercase_and_padded_literals_are_not_counted() {
        let id = Uuid::new_v4();
        let course = (Uuid::new_v4(), "Arte");
        let records = ["AD", "ad", " c "]
            .iter()
            .map(|grade| flat((id, "Norte"), Uuid::new_v4(), ("1", "Primaria"), course, grade))
            .collect();
        let service = StatisticsService::new(MemorySource::new(records));

        let report = service.get_school_distribution(Some(id)).await.unwrap();
        let SchoolDistributionReport::School(row) = report else {
            panic!("expected single school row");
        };
        assert_eq!(row.distribution.total, 1);
        assert_eq!(row.distribution.counts.ad, 1);
        assert_eq!(row.distribution.percentages.ad, 100.0);
    }

    #[tokio::test]
    async fn school_with_only_invalid_literals_gets_zero_row() {
        let id = Uuid::new_v4();
        let record = flat(
            (id, "Norte"),
            Uuid::new_v4(),
            ("1", "Primaria"),
            (Uuid::new_v4(), "Arte"),
            "NP",
        );
        let service = StatisticsService::new(MemorySource::new(vec![record]));

        let report = service.get_school_distribution(Some(id)).await.unwrap();
        let SchoolDistributionReport::School(row) = report else {
            panic!("expected single school row");
        };
        assert_eq!(row.distribution.total, 0);
    }

    #[tokio::test]
    async fn course_risk_global_example() {
        let school = Uuid::new_v4();
        let course = (Uuid::new_v4(), "Matemática");
        // student averages 3.5, 2.5, 1.33, 2.0, 4.0
        let records = course_with_averages(
            school,
            course,
            &[&["AD", "A"], &["A", "B"], &["C", "B", "C"], &["B"], &["AD"]],
        );
        let service = StatisticsService::new(MemorySource::new(records));

        let report = service.get_course_risk(None).await.unwrap();
        assert_eq!(report.courses.len(), 1);
        let row = &report.courses[0];
        assert_eq!(row.total_students, 5);
        assert_eq!(row.at_risk, 3);
        assert_eq!(row.risk_pct, 60.0);
        assert_eq!(row.breakdown.b_range, 2);
        assert_eq!(row.breakdown.c_range, 1);
        assert_eq!(report.problem_rate, ProblemRate::Global(60.0));
    }

    #[tokio::test]
    async fn course_risk_school_threshold_excludes_two_students() {
        let school = Uuid::new_v4();
        let records = course_with_averages(
            school,
            (Uuid::new_v4(), "Arte"),
            &[&["C"], &["C"]],
        );
        let service = StatisticsService::new(MemorySource::new(records));

        let report = service.get_course_risk(Some(school)).await.unwrap();
        assert!(report.courses.is_empty());
        assert_eq!(report.analyzed_courses, 0);
        assert_eq!(report.total_courses, 1);
        assert_eq!(report.problem_rate, ProblemRate::Local(0.0));
    }

    #[tokio::test]
    async fn course_risk_without_data_still_counts_courses() {
        let school = Uuid::new_v4();
        let source = MemorySource::default()
            .with_school(school, "Norte")
            .with_course(school, Uuid::new_v4())
            .with_course(school, Uuid::new_v4());
        let service = StatisticsService::new(source);

        let report = service.get_course_risk(None).await.unwrap();
        assert!(report.courses.is_empty());
        assert_eq!(report.total_courses, 2);
        assert_eq!(report.problem_rate.value(), 0.0);
    }

    #[tokio::test]
    async fn grade_performance_rows_are_labeled() {
        let school = Uuid::new_v4();
        let service = StatisticsService::new(MemorySource::new(scenario_a_school(school)));

        let report = service.get_grade_performance(school).await.unwrap();
        assert_eq!(report.total_rows, 1);
        let row = &report.rows[0];
        assert_eq!(row.label, "3° Primaria");
        assert_eq!(row.student_count, 20);
        // (5*4 + 10*3 + 3*2 + 2*1) / 20
        assert_eq!(row.average, 2.9);
    }

    #[tokio::test]
    async fn grade_performance_empty_school() {
        let school = Uuid::new_v4();
        let service = StatisticsService::new(MemorySource::default().with_school(school, "Norte"));

        let report = service.get_grade_performance(school).await.unwrap();
        assert!(report.rows.is_empty());
        assert_eq!(report.total_rows, 0);
    }

    #[tokio::test]
    async fn repeated_calls_are_identical() {
        let school = Uuid::new_v4();
        let mut records = scenario_a_school(school);
        records.extend(course_with_averages(
            school,
            (Uuid::new_v4(), "Ciencia"),
            &[&["C"], &["B"], &["A"], &["AD"], &["C"]],
        ));
        let service = StatisticsService::new(MemorySource::new(records));

        assert_eq!(
            service.get_course_risk(None).await.unwrap(),
            service.get_course_risk(None).await.unwrap()
        );
        assert_eq!(
            service.get_school_distribution(None).await.unwrap(),
            service.get_school_distribution(None).await.unwrap()
        );
        assert_eq!(
            service.get_grade_performance(school).await.unwrap(),
            service.get_grade_performance(school).await.unwrap()
        );
    }

    #[tokio::test]
    async fn source_failures_fail_the_whole_report() {
        let service = StatisticsService::new(BrokenSource);

        let err = service.get_school_distribution(None).await.unwrap_err();
        assert_eq!(err.report(), ReportKind::SchoolDistribution);
        assert_eq!(
            err.to_string(),
            "could not compute school distribution for global"
        );

        let school = Uuid::new_v4();
        let err = service.get_course_risk(Some(school)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("could not compute course risk for school:{school}")
        );

        let err = service.get_grade_performance(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.report(), ReportKind::GradePerformance);
    }
}
