//! Best-effort loading of the four reference collections into an immutable
//! [`Snapshot`].
//!
//! Each collection is fetched on its own scoped thread. A fetch that fails
//! (or panics) is logged and replaced by an empty collection; the other
//! fetches are unaffected. Missing data can only hide findings, never invent
//! them.

use crate::db;
use crate::model::{
    is_reserved_activity, ActivityDefinition, AssignmentRow, GradeRecord, PersonRef, Student,
    TeacherAssignment, UnstaffedScope, RESERVED_ACTIVITY_NAMES,
};
use rusqlite::{params_from_iter, Connection};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Assignments,
    Activities,
    Grades,
    Students,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assignments => "assignments",
            Self::Activities => "activities",
            Self::Grades => "grades",
            Self::Students => "students",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{collection}: cannot open data source: {source}")]
    Open {
        collection: Collection,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{collection}: query failed: {source}")]
    Query {
        collection: Collection,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{collection}: row {row_id} has malformed {column}: {source}")]
    Decode {
        collection: Collection,
        row_id: String,
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{collection}: source unavailable: {reason}")]
    Unavailable {
        collection: Collection,
        reason: String,
    },
    #[error("{collection}: fetch panicked")]
    Panicked { collection: Collection },
}

/// Supplier of raw rows. Implementations must be shareable across the
/// loader's fetch threads.
pub trait SnapshotSource: Sync {
    fn fetch_assignments(&self) -> Result<Vec<AssignmentRow>, LoadError>;
    fn fetch_activities(&self) -> Result<Vec<ActivityDefinition>, LoadError>;
    /// Grade rows whose activity name is not in `excluded`.
    fn fetch_grades(&self, excluded: &[&str]) -> Result<Vec<GradeRecord>, LoadError>;
    fn fetch_students(&self) -> Result<Vec<Student>, LoadError>;
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub assignments: Vec<TeacherAssignment>,
    pub unstaffed: Vec<UnstaffedScope>,
    pub activities: Vec<ActivityDefinition>,
    pub grades: Vec<GradeRecord>,
    pub students: Vec<Student>,
    pub failed: Vec<Collection>,
    pub loaded_at: String,
    pub fingerprint: String,
}

impl Snapshot {
    pub fn new(
        assignments: Vec<TeacherAssignment>,
        activities: Vec<ActivityDefinition>,
        grades: Vec<GradeRecord>,
        students: Vec<Student>,
    ) -> Self {
        let mut snapshot = Self {
            assignments,
            unstaffed: Vec::new(),
            activities,
            grades,
            students,
            failed: Vec::new(),
            loaded_at: chrono::Utc::now().to_rfc3339(),
            fingerprint: String::new(),
        };
        snapshot.fingerprint = snapshot.compute_fingerprint();
        snapshot
    }

    pub fn with_unstaffed(mut self, unstaffed: Vec<UnstaffedScope>) -> Self {
        self.unstaffed = unstaffed;
        self.fingerprint = self.compute_fingerprint();
        self
    }

    /// Records collections that could not be fetched; they are part of the
    /// fingerprint because they change what a query checks.
    pub fn with_failed(mut self, failed: Vec<Collection>) -> Self {
        self.failed = failed;
        self.fingerprint = self.compute_fingerprint();
        self
    }

    fn compute_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            serde_json::to_vec(&self.assignments),
            serde_json::to_vec(&self.unstaffed),
            serde_json::to_vec(&self.activities),
            serde_json::to_vec(&self.grades),
            serde_json::to_vec(&self.students),
        ] {
            // Entities are plain data; serialization cannot fail in practice.
            if let Ok(bytes) = part {
                hasher.update(&bytes);
            }
            hasher.update(b"\n");
        }
        for collection in &self.failed {
            hasher.update(collection.as_str().as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

fn settle<T>(
    collection: Collection,
    fetched: Result<Vec<T>, LoadError>,
    failed: &mut Vec<Collection>,
) -> Vec<T> {
    match fetched {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(%collection, error = %e, "fetch failed; continuing with empty collection");
            failed.push(collection);
            Vec::new()
        }
    }
}

pub fn load_snapshot<S>(source: &S) -> Snapshot
where
    S: SnapshotSource + ?Sized,
{
    let (assignments, activities, grades, students) = std::thread::scope(|scope| {
        let assignments = scope.spawn(|| source.fetch_assignments());
        let activities = scope.spawn(|| source.fetch_activities());
        let grades = scope.spawn(|| source.fetch_grades(&RESERVED_ACTIVITY_NAMES));
        let students = scope.spawn(|| source.fetch_students());
        (
            assignments.join().unwrap_or_else(|_| {
                Err(LoadError::Panicked {
                    collection: Collection::Assignments,
                })
            }),
            activities.join().unwrap_or_else(|_| {
                Err(LoadError::Panicked {
                    collection: Collection::Activities,
                })
            }),
            grades.join().unwrap_or_else(|_| {
                Err(LoadError::Panicked {
                    collection: Collection::Grades,
                })
            }),
            students.join().unwrap_or_else(|_| {
                Err(LoadError::Panicked {
                    collection: Collection::Students,
                })
            }),
        )
    });

    let mut failed = Vec::new();
    let assignment_rows = settle(Collection::Assignments, assignments, &mut failed);
    let activities = settle(Collection::Activities, activities, &mut failed);
    let mut grades = settle(Collection::Grades, grades, &mut failed);
    let mut students = settle(Collection::Students, students, &mut failed);

    let mut assignments: Vec<TeacherAssignment> = Vec::with_capacity(assignment_rows.len());
    let mut unstaffed: Vec<UnstaffedScope> = Vec::new();
    for row in assignment_rows {
        match row.resolve() {
            Ok(a) => assignments.push(a),
            Err(scope) => unstaffed.push(scope),
        }
    }
    if !unstaffed.is_empty() {
        tracing::debug!(
            dropped = unstaffed.len(),
            "dropped assignments with unresolved teacher reference"
        );
    }

    grades.retain(|g| !is_reserved_activity(&g.activity_name));
    students.sort_by(|a, b| a.last_name.cmp(&b.last_name));

    let snapshot = Snapshot::new(assignments, activities, grades, students)
        .with_unstaffed(unstaffed)
        .with_failed(failed);
    tracing::info!(
        assignments = snapshot.assignments.len(),
        activities = snapshot.activities.len(),
        grades = snapshot.grades.len(),
        students = snapshot.students.len(),
        failed = snapshot.failed.len(),
        "snapshot loaded"
    );
    snapshot
}

/// Reads the workspace database. Every fetch opens its own read-only
/// connection so the fetches can run side by side.
#[derive(Debug, Clone)]
pub struct SqliteSource {
    path: PathBuf,
}

impl SqliteSource {
    pub fn new(workspace: &Path) -> Self {
        Self {
            path: db::db_path(workspace),
        }
    }

    fn connect(&self, collection: Collection) -> Result<Connection, LoadError> {
        if !self.path.is_file() {
            return Err(LoadError::Unavailable {
                collection,
                reason: format!("{} does not exist", self.path.to_string_lossy()),
            });
        }
        db::open_read_only(&self.path).map_err(|source| LoadError::Open { collection, source })
    }
}

fn decode_set(
    collection: Collection,
    row_id: &str,
    column: &'static str,
    raw: &str,
) -> Result<Vec<String>, LoadError> {
    serde_json::from_str(raw).map_err(|source| LoadError::Decode {
        collection,
        row_id: row_id.to_string(),
        column,
        source,
    })
}

impl SnapshotSource for SqliteSource {
    fn fetch_assignments(&self) -> Result<Vec<AssignmentRow>, LoadError> {
        let collection = Collection::Assignments;
        let query_err = |source: rusqlite::Error| LoadError::Query { collection, source };
        let conn = self.connect(collection)?;
        let mut stmt = conn
            .prepare(
                "SELECT a.id, p.code, p.first_name, p.last_name,
                        a.subjects_json, a.grades_json, a.classrooms_json
                 FROM teacher_assignments a
                 LEFT JOIN persons p ON p.id = a.person_id
                 ORDER BY a.rowid",
            )
            .map_err(query_err)?;
        let raw_rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)?;

        let mut rows = Vec::with_capacity(raw_rows.len());
        for (id, code, first, last, subjects, grades, classrooms) in raw_rows {
            let person = code.map(|code| PersonRef {
                code,
                first_name: first.unwrap_or_default(),
                last_name: last.unwrap_or_default(),
            });
            rows.push(AssignmentRow {
                subjects: decode_set(collection, &id, "subjects", &subjects)?,
                grades: decode_set(collection, &id, "grades", &grades)?,
                classrooms: decode_set(collection, &id, "classrooms", &classrooms)?,
                person,
                id,
            });
        }
        Ok(rows)
    }

    fn fetch_activities(&self) -> Result<Vec<ActivityDefinition>, LoadError> {
        let collection = Collection::Activities;
        let query_err = |source: rusqlite::Error| LoadError::Query { collection, source };
        let conn = self.connect(collection)?;
        let mut stmt = conn
            .prepare(
                "SELECT subject, grade, classroom, period, name, weight_percent
                 FROM activities
                 ORDER BY rowid",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |r| {
                Ok(ActivityDefinition {
                    subject: r.get(0)?,
                    grade: r.get(1)?,
                    classroom: r.get(2)?,
                    period: r.get(3)?,
                    name: r.get(4)?,
                    weight_percent: r.get(5)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)?;
        Ok(rows)
    }

    fn fetch_grades(&self, excluded: &[&str]) -> Result<Vec<GradeRecord>, LoadError> {
        let collection = Collection::Grades;
        let query_err = |source: rusqlite::Error| LoadError::Query { collection, source };
        let conn = self.connect(collection)?;
        let filter = if excluded.is_empty() {
            String::new()
        } else {
            let placeholders = std::iter::repeat("?")
                .take(excluded.len())
                .collect::<Vec<_>>()
                .join(",");
            format!("WHERE activity_name NOT IN ({})", placeholders)
        };
        let sql = format!(
            "SELECT student_id, subject, grade, classroom, period, activity_name, weight_percent, score
             FROM grades
             {}
             ORDER BY rowid",
            filter
        );
        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map(params_from_iter(excluded.iter()), |r| {
                Ok(GradeRecord {
                    student_id: r.get(0)?,
                    subject: r.get(1)?,
                    grade: r.get(2)?,
                    classroom: r.get(3)?,
                    period: r.get(4)?,
                    activity_name: r.get(5)?,
                    weight_percent: r.get(6)?,
                    score: r.get(7)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)?;
        Ok(rows)
    }

    fn fetch_students(&self) -> Result<Vec<Student>, LoadError> {
        let collection = Collection::Students;
        let query_err = |source: rusqlite::Error| LoadError::Query { collection, source };
        let conn = self.connect(collection)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, first_name, last_name, grade, classroom
                 FROM students
                 ORDER BY last_name, first_name, id",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |r| {
                Ok(Student {
                    student_id: r.get(0)?,
                    first_name: r.get(1)?,
                    last_name: r.get(2)?,
                    grade: r.get(3)?,
                    classroom: r.get(4)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeSource {
        assignments: Vec<AssignmentRow>,
        activities: Vec<ActivityDefinition>,
        grades: Vec<GradeRecord>,
        students: Vec<Student>,
        failing: Vec<Collection>,
    }

    impl FakeSource {
        fn check(&self, collection: Collection) -> Result<(), LoadError> {
            if self.failing.contains(&collection) {
                return Err(LoadError::Unavailable {
                    collection,
                    reason: "connection reset".to_string(),
                });
            }
            Ok(())
        }
    }

    impl SnapshotSource for FakeSource {
        fn fetch_assignments(&self) -> Result<Vec<AssignmentRow>, LoadError> {
            self.check(Collection::Assignments)?;
            Ok(self.assignments.clone())
        }

        fn fetch_activities(&self) -> Result<Vec<ActivityDefinition>, LoadError> {
            self.check(Collection::Activities)?;
            Ok(self.activities.clone())
        }

        fn fetch_grades(&self, excluded: &[&str]) -> Result<Vec<GradeRecord>, LoadError> {
            self.check(Collection::Grades)?;
            Ok(self
                .grades
                .iter()
                .filter(|g| !excluded.contains(&g.activity_name.as_str()))
                .cloned()
                .collect())
        }

        fn fetch_students(&self) -> Result<Vec<Student>, LoadError> {
            self.check(Collection::Students)?;
            Ok(self.students.clone())
        }
    }

    fn student(id: &str, first: &str, last: &str) -> Student {
        Student {
            student_id: id.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            grade: "5th".to_string(),
            classroom: "1".to_string(),
        }
    }

    fn grade_row(activity: &str) -> GradeRecord {
        GradeRecord {
            student_id: "s1".to_string(),
            subject: "Math".to_string(),
            grade: "5th".to_string(),
            classroom: "1".to_string(),
            period: 1,
            activity_name: activity.to_string(),
            weight_percent: Some(50.0),
            score: Some(4.5),
        }
    }

    fn assignment_row(id: &str, person: Option<PersonRef>) -> AssignmentRow {
        AssignmentRow {
            id: id.to_string(),
            person,
            subjects: vec!["Math".to_string()],
            grades: vec!["5th".to_string()],
            classrooms: vec!["1".to_string()],
        }
    }

    #[test]
    fn failed_fetch_degrades_to_empty_collection() {
        let source = FakeSource {
            students: vec![student("s1", "Ana", "Zapata")],
            grades: vec![grade_row("Quiz")],
            failing: vec![Collection::Grades],
            ..FakeSource::default()
        };
        let snapshot = load_snapshot(&source);
        assert!(snapshot.grades.is_empty());
        assert_eq!(snapshot.students.len(), 1);
        assert_eq!(snapshot.failed, vec![Collection::Grades]);
    }

    #[test]
    fn unresolved_teacher_reference_keeps_only_its_scope() {
        let source = FakeSource {
            assignments: vec![
                assignment_row(
                    "a1",
                    Some(PersonRef {
                        code: "T-01".to_string(),
                        first_name: "Laura".to_string(),
                        last_name: "Gomez".to_string(),
                    }),
                ),
                assignment_row("a2", None),
            ],
            ..FakeSource::default()
        };
        let snapshot = load_snapshot(&source);
        assert_eq!(snapshot.assignments.len(), 1);
        assert_eq!(snapshot.assignments[0].teacher_name, "Laura Gomez");
        assert_eq!(snapshot.assignments[0].teacher_code, "T-01");
        assert_eq!(snapshot.unstaffed.len(), 1);
        assert_eq!(snapshot.unstaffed[0].assignment_id, "a2");
        assert!(snapshot.failed.is_empty());
    }

    #[test]
    fn reserved_grades_are_excluded_and_students_sorted_by_last_name() {
        let source = FakeSource {
            grades: vec![
                grade_row("Quiz"),
                grade_row("Final Period"),
                grade_row("Final Definitive"),
            ],
            students: vec![
                student("s2", "Bruno", "Zapata"),
                student("s1", "Ana", "Alvarez"),
            ],
            ..FakeSource::default()
        };
        let snapshot = load_snapshot(&source);
        assert_eq!(snapshot.grades.len(), 1);
        assert_eq!(snapshot.grades[0].activity_name, "Quiz");
        let order: Vec<&str> = snapshot
            .students
            .iter()
            .map(|s| s.student_id.as_str())
            .collect();
        assert_eq!(order, vec!["s1", "s2"]);
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = Snapshot::new(vec![], vec![], vec![], vec![student("s1", "Ana", "Ruiz")]);
        let b = Snapshot::new(vec![], vec![], vec![], vec![student("s1", "Ana", "Ruiz")]);
        let c = Snapshot::new(vec![], vec![], vec![], vec![student("s1", "Ana", "Rios")]);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
    }

    #[test]
    fn fingerprint_changes_when_a_failed_collection_recovers_empty() {
        let failing = FakeSource {
            failing: vec![Collection::Grades],
            ..FakeSource::default()
        };
        let recovered = FakeSource::default();
        let before = load_snapshot(&failing);
        let after = load_snapshot(&recovered);
        assert!(before.grades.is_empty() && after.grades.is_empty());
        assert_ne!(before.fingerprint, after.fingerprint);
    }
}
