use anyhow::Context;
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const DB_FILE: &str = "gradecheck.sqlite3";

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let conn = Connection::open(db_path(workspace))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS persons(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL
        )",
        [],
    )?;

    // person_id is not a foreign key; dangling references are dropped at load time.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_assignments(
            id TEXT PRIMARY KEY,
            person_id TEXT NOT NULL,
            subjects_json TEXT NOT NULL,
            grades_json TEXT NOT NULL,
            classrooms_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            grade TEXT NOT NULL,
            classroom TEXT NOT NULL,
            period INTEGER NOT NULL,
            name TEXT NOT NULL,
            weight_percent REAL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_scope
         ON activities(subject, grade, classroom, period)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            grade TEXT NOT NULL,
            classroom TEXT NOT NULL,
            period INTEGER NOT NULL,
            activity_name TEXT NOT NULL,
            weight_percent REAL,
            score REAL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            grade TEXT NOT NULL,
            classroom TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_last_name ON students(last_name)",
        [],
    )?;

    Ok(conn)
}

/// Read-only handle used by the snapshot loader; one per fetch.
pub fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Replace,
    Append,
}

impl ImportMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "replace" => Some(Self::Replace),
            "append" => Some(Self::Append),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonInput {
    pub id: Option<String>,
    pub code: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentInput {
    pub id: Option<String>,
    pub person_id: String,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub grades: Vec<String>,
    #[serde(default)]
    pub classrooms: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityInput {
    pub id: Option<String>,
    pub subject: String,
    pub grade: String,
    pub classroom: String,
    pub period: i64,
    pub name: String,
    pub weight_percent: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeInput {
    pub id: Option<String>,
    pub student_id: String,
    pub subject: String,
    pub grade: String,
    pub classroom: String,
    pub period: i64,
    pub activity_name: String,
    pub weight_percent: Option<f64>,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInput {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub grade: String,
    pub classroom: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    #[serde(default)]
    pub persons: Vec<PersonInput>,
    #[serde(default)]
    pub assignments: Vec<AssignmentInput>,
    #[serde(default)]
    pub activities: Vec<ActivityInput>,
    #[serde(default)]
    pub grades: Vec<GradeInput>,
    #[serde(default)]
    pub students: Vec<StudentInput>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportCounts {
    pub persons: usize,
    pub assignments: usize,
    pub activities: usize,
    pub grades: usize,
    pub students: usize,
}

fn row_id(id: &Option<String>) -> String {
    id.as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn import_batch(
    conn: &mut Connection,
    batch: &ImportBatch,
    mode: ImportMode,
) -> anyhow::Result<ImportCounts> {
    let tx = conn.transaction()?;
    if mode == ImportMode::Replace {
        for table in ["grades", "activities", "teacher_assignments", "persons", "students"] {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
    }

    let mut counts = ImportCounts::default();
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO persons(id, code, first_name, last_name) VALUES(?, ?, ?, ?)",
        )?;
        for p in &batch.persons {
            stmt.execute((row_id(&p.id), &p.code, &p.first_name, &p.last_name))?;
            counts.persons += 1;
        }

        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO teacher_assignments(id, person_id, subjects_json, grades_json, classrooms_json)
             VALUES(?, ?, ?, ?, ?)",
        )?;
        for a in &batch.assignments {
            stmt.execute((
                row_id(&a.id),
                &a.person_id,
                serde_json::to_string(&a.subjects)?,
                serde_json::to_string(&a.grades)?,
                serde_json::to_string(&a.classrooms)?,
            ))?;
            counts.assignments += 1;
        }

        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO activities(id, subject, grade, classroom, period, name, weight_percent)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
        )?;
        for a in &batch.activities {
            stmt.execute((
                row_id(&a.id),
                &a.subject,
                &a.grade,
                &a.classroom,
                a.period,
                &a.name,
                a.weight_percent,
            ))?;
            counts.activities += 1;
        }

        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO grades(id, student_id, subject, grade, classroom, period, activity_name, weight_percent, score)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for g in &batch.grades {
            stmt.execute((
                row_id(&g.id),
                &g.student_id,
                &g.subject,
                &g.grade,
                &g.classroom,
                g.period,
                &g.activity_name,
                g.weight_percent,
                g.score,
            ))?;
            counts.grades += 1;
        }

        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO students(id, first_name, last_name, grade, classroom)
             VALUES(?, ?, ?, ?, ?)",
        )?;
        for s in &batch.students {
            stmt.execute((&s.id, &s.first_name, &s.last_name, &s.grade, &s.classroom))?;
            counts.students += 1;
        }
    }
    tx.commit()?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ))
    }

    #[test]
    fn replace_import_clears_previous_rows_and_generates_ids() {
        let workspace = temp_dir("gradecheck-db-import");
        let mut conn = open_db(&workspace).expect("open db");

        let batch: ImportBatch = serde_json::from_value(serde_json::json!({
            "activities": [
                { "subject": "Math", "grade": "5th", "classroom": "1", "period": 1, "name": "Quiz", "weightPercent": 40 },
                { "id": "a2", "subject": "Math", "grade": "5th", "classroom": "1", "period": 1, "name": "Exam", "weightPercent": null }
            ]
        }))
        .expect("batch");
        let counts = import_batch(&mut conn, &batch, ImportMode::Append).expect("import");
        assert_eq!(counts.activities, 2);

        let generated: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM activities WHERE id <> 'a2' AND length(id) = 36",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(generated, 1);

        let empty = ImportBatch::default();
        import_batch(&mut conn, &empty, ImportMode::Replace).expect("replace");
        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM activities", [], |r| r.get(0))
            .expect("count");
        assert_eq!(left, 0);

        drop(conn);
        let _ = std::fs::remove_dir_all(workspace);
    }
}
