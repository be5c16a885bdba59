use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    ClassroomGradeRecord, CourseGradeRecord, FlatGradeRecord, School, SchoolGradeCount, SchoolId,
    Scope,
};

/// Read-only queries the statistics service needs from the data store.
#[async_trait]
pub trait GradeSource: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    /// Every grade record in scope, whatever its stored value.
    async fn count_grade_records(&self, scope: &Scope) -> anyhow::Result<i64>;

    async fn count_schools(&self) -> anyhow::Result<i64>;

    /// Schools in scope ordered by name.
    async fn schools(&self, scope: &Scope) -> anyhow::Result<Vec<School>>;

    async fn school_grade_counts(&self, scope: &Scope) -> anyhow::Result<Vec<SchoolGradeCount>>;

    async fn classroom_grade_records(
        &self,
        school: SchoolId,
    ) -> anyhow::Result<Vec<ClassroomGradeRecord>>;

    async fn course_grade_records(&self, scope: &Scope) -> anyhow::Result<Vec<CourseGradeRecord>>;

    async fn count_courses(&self, scope: &Scope) -> anyhow::Result<i64>;
}

/// Grade data held in memory, loaded from a flat export or built in tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    schools: Vec<School>,
    courses: Vec<(SchoolId, Uuid)>,
    records: Vec<FlatGradeRecord>,
}

impl MemorySource {
    pub fn new(records: Vec<FlatGradeRecord>) -> Self {
        let mut source = MemorySource::default();
        for record in records {
            source.push(record);
        }
        source
    }

    pub fn from_csv(path: &Path) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let records = reader
            .deserialize::<FlatGradeRecord>()
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(MemorySource::new(records))
    }

    /// Registers a school even when it has no grade records.
    pub fn with_school(mut self, id: SchoolId, name: &str) -> Self {
        self.add_school(id, name);
        self
    }

    /// Registers a course offered by a school even when nobody has been graded in it.
    pub fn with_course(mut self, school: SchoolId, course: Uuid) -> Self {
        self.add_course(school, course);
        self
    }

    pub fn push(&mut self, record: FlatGradeRecord) {
        self.add_school(record.school_id, &record.school_name);
        self.add_course(record.school_id, record.course_id);
        self.records.push(record);
    }

    fn add_school(&mut self, id: SchoolId, name: &str) {
        if !self.schools.iter().any(|school| school.id == id) {
            self.schools.push(School {
                id,
                name: name.to_string(),
            });
        }
    }

    fn add_course(&mut self, school: SchoolId, course: Uuid) {
        if !self.courses.contains(&(school, course)) {
            self.courses.push((school, course));
        }
    }

    fn in_scope<'a>(&'a self, scope: &'a Scope) -> impl Iterator<Item = &'a FlatGradeRecord> + 'a {
        self.records
            .iter()
            .filter(move |record| match scope {
                Scope::Global => true,
                Scope::School(id) => record.school_id == *id,
            })
    }
}

#[async_trait]
impl GradeSource for MemorySource {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn count_grade_records(&self, scope: &Scope) -> anyhow::Result<i64> {
        Ok(self.in_scope(scope).count() as i64)
    }

    async fn count_schools(&self) -> anyhow::Result<i64> {
        Ok(self.schools.len() as i64)
    }

    async fn schools(&self, scope: &Scope) -> anyhow::Result<Vec<School>> {
        let mut schools: Vec<School> = self
            .schools
            .iter()
            .filter(|school| scope.school_id().map_or(true, |id| id == school.id))
            .cloned()
            .collect();
        schools.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(schools)
    }

    async fn school_grade_counts(&self, scope: &Scope) -> anyhow::Result<Vec<SchoolGradeCount>> {
        Ok(self
            .in_scope(scope)
            .map(|record| SchoolGradeCount {
                school_id: record.school_id,
                school_name: record.school_name.clone(),
                grade: record.grade.clone(),
                count: 1,
            })
            .collect())
    }

    async fn classroom_grade_records(
        &self,
        school: SchoolId,
    ) -> anyhow::Result<Vec<ClassroomGradeRecord>> {
        Ok(self
            .in_scope(&Scope::School(school))
            .map(|record| ClassroomGradeRecord {
                student_id: record.student_id,
                classroom_grade: record.classroom_grade.clone(),
                level_name: record.level_name.clone(),
                grade: record.grade.clone(),
            })
            .collect())
    }

    async fn course_grade_records(&self, scope: &Scope) -> anyhow::Result<Vec<CourseGradeRecord>> {
        Ok(self
            .in_scope(scope)
            .map(|record| CourseGradeRecord {
                course_id: record.course_id,
                course_name: record.course_name.clone(),
                level_name: record.level_name.clone(),
                student_id: record.student_id,
                grade: record.grade.clone(),
            })
            .collect())
    }

    async fn count_courses(&self, scope: &Scope) -> anyhow::Result<i64> {
        let courses: BTreeSet<Uuid> = self
            .courses
            .iter()
            .filter(|(school, _)| scope.school_id().map_or(true, |id| id == *school))
            .map(|(_, course)| *course)
            .collect();
        Ok(courses.len() as i64)
    }
}
