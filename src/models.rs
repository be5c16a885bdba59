use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::grade::LiteralGrade;

pub type SchoolId = Uuid;

/// Which slice of the data store a report reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    School(SchoolId),
}

impl Scope {
    pub fn from_school(school: Option<SchoolId>) -> Self {
        school.map_or(Scope::Global, Scope::School)
    }

    pub fn school_id(&self) -> Option<SchoolId> {
        match self {
            Scope::Global => None,
            Scope::School(id) => Some(*id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => f.write_str("global"),
            Scope::School(id) => write!(f, "school:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct School {
    pub id: SchoolId,
    pub name: String,
}

/// Grouped count of grade records for one (school, stored literal) pair.
#[derive(Debug, Clone)]
pub struct SchoolGradeCount {
    pub school_id: SchoolId,
    pub school_name: String,
    pub grade: String,
    pub count: i64,
}

/// One grade record placed in the student's classroom.
#[derive(Debug, Clone)]
pub struct ClassroomGradeRecord {
    pub student_id: Uuid,
    pub classroom_grade: String,
    pub level_name: String,
    pub grade: String,
}

/// One grade record placed in the course its evaluation belongs to.
#[derive(Debug, Clone)]
pub struct CourseGradeRecord {
    pub course_id: Uuid,
    pub course_name: String,
    pub level_name: String,
    pub student_id: Uuid,
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentCourseAverage {
    pub course_id: Uuid,
    pub course_name: String,
    pub level_name: String,
    pub student_id: Uuid,
    pub average: f64,
}

/// Flat export row: one grade record with all the metadata the reports need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatGradeRecord {
    pub school_id: SchoolId,
    pub school_name: String,
    pub student_id: Uuid,
    pub level_name: String,
    pub classroom_grade: String,
    pub classroom_section: String,
    pub course_id: Uuid,
    pub course_name: String,
    pub grade: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GradeCounts {
    #[serde(rename = "AD")]
    pub ad: i64,
    #[serde(rename = "A")]
    pub a: i64,
    #[serde(rename = "B")]
    pub b: i64,
    #[serde(rename = "C")]
    pub c: i64,
}

impl GradeCounts {
    pub fn add(&mut self, grade: LiteralGrade, count: i64) {
        match grade {
            LiteralGrade::AD => self.ad += count,
            LiteralGrade::A => self.a += count,
            LiteralGrade::B => self.b += count,
            LiteralGrade::C => self.c += count,
        }
    }

    pub fn get(&self, grade: LiteralGrade) -> i64 {
        match grade {
            LiteralGrade::AD => self.ad,
            LiteralGrade::A => self.a,
            LiteralGrade::B => self.b,
            LiteralGrade::C => self.c,
        }
    }

    pub fn total(&self) -> i64 {
        self.ad + self.a + self.b + self.c
    }

    pub fn merge(self, other: GradeCounts) -> GradeCounts {
        GradeCounts {
            ad: self.ad + other.ad,
            a: self.a + other.a,
            b: self.b + other.b,
            c: self.c + other.c,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GradePercentages {
    #[serde(rename = "AD")]
    pub ad: f64,
    #[serde(rename = "A")]
    pub a: f64,
    #[serde(rename = "B")]
    pub b: f64,
    #[serde(rename = "C")]
    pub c: f64,
}

impl GradePercentages {
    pub fn sum(&self) -> f64 {
        self.ad + self.a + self.b + self.c
    }
}

/// Counts of each literal plus their share of the total.
///
/// Each percentage is rounded on its own, so the four may add up to
/// slightly more or less than 100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LiteralDistribution {
    #[serde(rename = "conteos")]
    pub counts: GradeCounts,
    #[serde(rename = "totalNotas")]
    pub total: i64,
    #[serde(rename = "porcentajes")]
    pub percentages: GradePercentages,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchoolDistributionRow {
    #[serde(rename = "colegioId")]
    pub school_id: SchoolId,
    #[serde(rename = "nombreColegio")]
    pub school_name: String,
    #[serde(flatten)]
    pub distribution: LiteralDistribution,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SchoolDistributionReport {
    Global {
        #[serde(rename = "colegios")]
        schools: Vec<SchoolDistributionRow>,
        #[serde(rename = "totalColegios")]
        total_schools: i64,
        #[serde(rename = "totalNotasGlobal")]
        total_grades_global: i64,
        #[serde(rename = "resumenGlobal")]
        summary: LiteralDistribution,
    },
    School(SchoolDistributionRow),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradePerformanceRow {
    #[serde(rename = "gradoNivel")]
    pub label: String,
    #[serde(rename = "grado")]
    pub grade: String,
    #[serde(rename = "nivel")]
    pub level: String,
    #[serde(rename = "totalAlumnos")]
    pub student_count: i64,
    #[serde(flatten)]
    pub distribution: LiteralDistribution,
    #[serde(rename = "promedio")]
    pub average: f64,
    #[serde(rename = "literalPromedio")]
    pub literal_average: Option<LiteralGrade>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradePerformanceReport {
    #[serde(rename = "grados")]
    pub rows: Vec<GradePerformanceRow>,
    #[serde(rename = "totalGrados")]
    pub total_rows: usize,
}

/// At-risk students split by how far below the threshold they sit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RiskBreakdown {
    #[serde(rename = "B")]
    pub b_range: i64,
    #[serde(rename = "C")]
    pub c_range: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseRiskRow {
    #[serde(rename = "cursoId")]
    pub course_id: Uuid,
    #[serde(rename = "nombreCurso")]
    pub course_name: String,
    #[serde(rename = "nivel")]
    pub level_name: String,
    #[serde(rename = "totalAlumnos")]
    pub total_students: i64,
    #[serde(rename = "alumnosProblema")]
    pub at_risk: i64,
    #[serde(rename = "porcentajeProblema")]
    pub risk_pct: f64,
    #[serde(rename = "detalle")]
    pub breakdown: RiskBreakdown,
}

/// Mean risk percentage across the reported courses, keyed by scope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ProblemRate {
    #[serde(rename = "promedioGlobalProblema")]
    Global(f64),
    #[serde(rename = "promedioLocalProblema")]
    Local(f64),
}

impl ProblemRate {
    pub fn value(&self) -> f64 {
        match self {
            ProblemRate::Global(v) | ProblemRate::Local(v) => *v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseRiskReport {
    #[serde(rename = "cursos")]
    pub courses: Vec<CourseRiskRow>,
    #[serde(rename = "cursosAnalizados")]
    pub analyzed_courses: usize,
    #[serde(rename = "totalCursos")]
    pub total_courses: i64,
    #[serde(flatten)]
    pub problem_rate: ProblemRate,
}
