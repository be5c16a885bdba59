use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::grade::LiteralGrade;
use crate::models::{
    ClassroomGradeRecord, CourseGradeRecord, School, SchoolGradeCount, SchoolId, Scope,
};
use crate::source::GradeSource;

const QUALIFYING_GRADES: &str = "g.grade IN ('AD', 'A', 'B', 'C')";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// One grade record in the import format, with every name needed to place it.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ImportRow {
    pub school_name: String,
    pub level_name: String,
    pub classroom_grade: String,
    pub classroom_section: String,
    pub student_name: String,
    pub course_name: String,
    pub competency: String,
    pub evaluation: String,
    pub grade: String,
    pub recorded_on: NaiveDate,
    pub source_key: Option<String>,
}

async fn upsert_named(conn: &mut PgConnection, table: &str, name: &str) -> anyhow::Result<Uuid> {
    let sql = format!(
        "INSERT INTO school_stats.{table} (id, name) VALUES ($1, $2) \
         ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name RETURNING id"
    );
    let id = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(&mut *conn)
        .await?
        .try_get("id")?;
    Ok(id)
}

async fn upsert_child(
    conn: &mut PgConnection,
    table: &str,
    parent_column: &str,
    parent: Uuid,
    name: &str,
) -> anyhow::Result<Uuid> {
    let sql = format!(
        "INSERT INTO school_stats.{table} (id, {parent_column}, name) VALUES ($1, $2, $3) \
         ON CONFLICT ({parent_column}, name) DO UPDATE SET name = EXCLUDED.name RETURNING id"
    );
    let id = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(parent)
        .bind(name)
        .fetch_one(&mut *conn)
        .await?
        .try_get("id")?;
    Ok(id)
}

/// Places one row, creating any missing school, level, classroom, student,
/// course, competency or evaluation. Returns whether a grade was inserted.
pub async fn insert_row(conn: &mut PgConnection, row: &ImportRow) -> anyhow::Result<bool> {
    let school_id = upsert_named(conn, "schools", &row.school_name).await?;
    let level_id = upsert_named(conn, "levels", &row.level_name).await?;

    let school_level_id: Uuid = sqlx::query(
        r#"
        INSERT INTO school_stats.school_levels (id, school_id, level_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (school_id, level_id) DO UPDATE SET level_id = EXCLUDED.level_id
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(school_id)
    .bind(level_id)
    .fetch_one(&mut *conn)
    .await?
    .try_get("id")?;

    let classroom_id: Uuid = sqlx::query(
        r#"
        INSERT INTO school_stats.classrooms (id, school_level_id, grade, section)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (school_level_id, grade, section) DO UPDATE SET grade = EXCLUDED.grade
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(school_level_id)
    .bind(&row.classroom_grade)
    .bind(&row.classroom_section)
    .fetch_one(&mut *conn)
    .await?
    .try_get("id")?;

    let student_id: Uuid = sqlx::query(
        r#"
        INSERT INTO school_stats.students (id, school_id, full_name)
        VALUES ($1, $2, $3)
        ON CONFLICT (school_id, full_name) DO UPDATE SET full_name = EXCLUDED.full_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(school_id)
    .bind(&row.student_name)
    .fetch_one(&mut *conn)
    .await?
    .try_get("id")?;

    sqlx::query(
        r#"
        INSERT INTO school_stats.classroom_students (classroom_id, student_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(classroom_id)
    .bind(student_id)
    .execute(&mut *conn)
    .await?;

    let course_id = upsert_child(conn, "courses", "level_id", level_id, &row.course_name).await?;
    let competency_id =
        upsert_child(conn, "competencies", "course_id", course_id, &row.competency).await?;
    let evaluation_id = upsert_child(
        conn,
        "evaluations",
        "competency_id",
        competency_id,
        &row.evaluation,
    )
    .await?;

    let source_key = row
        .source_key
        .clone()
        .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

    let result = sqlx::query(
        r#"
        INSERT INTO school_stats.grade_records
        (id, student_id, evaluation_id, grade, recorded_on, source_key)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(evaluation_id)
    .bind(&row.grade)
    .bind(row.recorded_on)
    .bind(source_key)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn seed_rows() -> anyhow::Result<Vec<ImportRow>> {
    let schools = ["Colegio San Martín", "Colegio Los Andes"];
    let classrooms = [("3", "Primaria"), ("4", "Primaria"), ("1", "Secundaria")];
    let courses = ["Matemática", "Comunicación", "Ciencia y Tecnología"];
    let evaluations = ["Evaluación 1", "Evaluación 2"];
    let pattern = [
        LiteralGrade::A,
        LiteralGrade::B,
        LiteralGrade::AD,
        LiteralGrade::C,
        LiteralGrade::A,
        LiteralGrade::B,
        LiteralGrade::A,
    ];
    let recorded_on = NaiveDate::from_ymd_opt(2026, 4, 15).context("invalid date")?;

    let mut rows = Vec::new();
    for (s, school) in schools.iter().enumerate() {
        for (k, (grade, level)) in classrooms.iter().enumerate() {
            for student in 0..6 {
                for (c, course) in courses.iter().enumerate() {
                    for (e, evaluation) in evaluations.iter().enumerate() {
                        let literal = pattern[(s + k + student * 2 + c * 3 + e) % pattern.len()];
                        rows.push(ImportRow {
                            school_name: school.to_string(),
                            level_name: level.to_string(),
                            classroom_grade: grade.to_string(),
                            classroom_section: "A".to_string(),
                            student_name: format!("Alumno {}-{}-{}", s + 1, grade, student + 1),
                            course_name: course.to_string(),
                            competency: "Competencia 1".to_string(),
                            evaluation: evaluation.to_string(),
                            grade: literal.to_string(),
                            recorded_on,
                            source_key: Some(format!("seed-{s}-{k}-{student}-{c}-{e}")),
                        });
                    }
                }
            }
        }
    }
    Ok(rows)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;
    for row in seed_rows()? {
        if insert_row(&mut *tx, &row).await? {
            inserted += 1;
        }
    }
    tx.commit().await?;
    Ok(inserted)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<ImportRow>().enumerate() {
        let row = result.with_context(|| format!("bad row {} in {}", line + 1, csv_path.display()))?;
        if insert_row(&mut *tx, &row).await? {
            inserted += 1;
        }
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Postgres-backed grade source.
#[derive(Clone)]
pub struct PgGradeSource {
    pool: PgPool,
}

impl PgGradeSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_scoped(
        &self,
        mut query: String,
        school_filter: &str,
        order_by: &str,
        scope: &Scope,
    ) -> anyhow::Result<Vec<PgRow>> {
        if scope.school_id().is_some() {
            query.push_str(school_filter);
        }
        query.push_str(order_by);

        let mut rows = sqlx::query(&query);
        if let Some(id) = scope.school_id() {
            rows = rows.bind(id);
        }
        Ok(rows.fetch_all(&self.pool).await?)
    }
}

#[async_trait]
impl GradeSource for PgGradeSource {
    fn backend_tag(&self) -> &'static str {
        "postgres"
    }

    async fn count_grade_records(&self, scope: &Scope) -> anyhow::Result<i64> {
        let count = match scope.school_id() {
            None => {
                sqlx::query("SELECT COUNT(*) AS count FROM school_stats.grade_records")
                    .fetch_one(&self.pool)
                    .await?
            }
            Some(id) => {
                sqlx::query(
                    "SELECT COUNT(*) AS count FROM school_stats.grade_records g \
                     JOIN school_stats.students st ON st.id = g.student_id \
                     WHERE st.school_id = $1",
                )
                .bind(id)
                .fetch_one(&self.pool)
                .await?
            }
        }
        .try_get("count")?;
        Ok(count)
    }

    async fn count_schools(&self) -> anyhow::Result<i64> {
        let count = sqlx::query("SELECT COUNT(*) AS count FROM school_stats.schools")
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;
        Ok(count)
    }

    async fn schools(&self, scope: &Scope) -> anyhow::Result<Vec<School>> {
        let rows = self
            .fetch_scoped(
                String::from("SELECT id, name FROM school_stats.schools"),
                " WHERE id = $1",
                " ORDER BY name, id",
                scope,
            )
            .await?;

        rows.iter()
            .map(|row| -> anyhow::Result<School> {
                Ok(School {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn school_grade_counts(&self, scope: &Scope) -> anyhow::Result<Vec<SchoolGradeCount>> {
        let query = format!(
            "SELECT sc.id AS school_id, sc.name AS school_name, g.grade, COUNT(*) AS count \
             FROM school_stats.grade_records g \
             JOIN school_stats.students st ON st.id = g.student_id \
             JOIN school_stats.schools sc ON sc.id = st.school_id \
             WHERE {QUALIFYING_GRADES}"
        );
        let rows = self
            .fetch_scoped(
                query,
                " AND sc.id = $1",
                " GROUP BY sc.id, sc.name, g.grade ORDER BY sc.name, sc.id",
                scope,
            )
            .await?;

        rows.iter()
            .map(|row| -> anyhow::Result<SchoolGradeCount> {
                Ok(SchoolGradeCount {
                    school_id: row.try_get("school_id")?,
                    school_name: row.try_get("school_name")?,
                    grade: row.try_get("grade")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    async fn classroom_grade_records(
        &self,
        school: SchoolId,
    ) -> anyhow::Result<Vec<ClassroomGradeRecord>> {
        let query = format!(
            "SELECT g.student_id, c.grade AS classroom_grade, l.name AS level_name, g.grade \
             FROM school_stats.grade_records g \
             JOIN school_stats.students st ON st.id = g.student_id \
             JOIN school_stats.classroom_students cs ON cs.student_id = st.id \
             JOIN school_stats.classrooms c ON c.id = cs.classroom_id \
             JOIN school_stats.school_levels sl ON sl.id = c.school_level_id \
             JOIN school_stats.levels l ON l.id = sl.level_id \
             WHERE {QUALIFYING_GRADES}"
        );
        let rows = self
            .fetch_scoped(
                query,
                " AND sl.school_id = $1",
                " ORDER BY l.name, c.grade",
                &Scope::School(school),
            )
            .await?;

        rows.iter()
            .map(|row| -> anyhow::Result<ClassroomGradeRecord> {
                Ok(ClassroomGradeRecord {
                    student_id: row.try_get("student_id")?,
                    classroom_grade: row.try_get("classroom_grade")?,
                    level_name: row.try_get("level_name")?,
                    grade: row.try_get("grade")?,
                })
            })
            .collect()
    }

    async fn course_grade_records(&self, scope: &Scope) -> anyhow::Result<Vec<CourseGradeRecord>> {
        let query = format!(
            "SELECT co.id AS course_id, co.name AS course_name, l.name AS level_name, \
             g.student_id, g.grade \
             FROM school_stats.grade_records g \
             JOIN school_stats.evaluations e ON e.id = g.evaluation_id \
             JOIN school_stats.competencies cp ON cp.id = e.competency_id \
             JOIN school_stats.courses co ON co.id = cp.course_id \
             JOIN school_stats.levels l ON l.id = co.level_id \
             JOIN school_stats.students st ON st.id = g.student_id \
             WHERE {QUALIFYING_GRADES}"
        );
        let rows = self
            .fetch_scoped(query, " AND st.school_id = $1", " ORDER BY co.id, g.student_id", scope)
            .await?;

        rows.iter()
            .map(|row| -> anyhow::Result<CourseGradeRecord> {
                Ok(CourseGradeRecord {
                    course_id: row.try_get("course_id")?,
                    course_name: row.try_get("course_name")?,
                    level_name: row.try_get("level_name")?,
                    student_id: row.try_get("student_id")?,
                    grade: row.try_get("grade")?,
                })
            })
            .collect()
    }

    async fn count_courses(&self, scope: &Scope) -> anyhow::Result<i64> {
        let count = match scope.school_id() {
            None => {
                sqlx::query("SELECT COUNT(*) AS count FROM school_stats.courses")
                    .fetch_one(&self.pool)
                    .await?
            }
            Some(id) => {
                sqlx::query(
                    "SELECT COUNT(DISTINCT co.id) AS count FROM school_stats.courses co \
                     JOIN school_stats.school_levels sl ON sl.level_id = co.level_id \
                     WHERE sl.school_id = $1",
                )
                .bind(id)
                .fetch_one(&self.pool)
                .await?
            }
        }
        .try_get("count")?;
        Ok(count)
    }
}
