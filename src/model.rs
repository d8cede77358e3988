use serde::Serialize;

/// Computed totals stored next to raw activity grades. They are never graded
/// directly, so completeness ignores them.
pub const RESERVED_ACTIVITY_NAMES: [&str; 2] = ["Final Period", "Final Definitive"];

pub fn is_reserved_activity(name: &str) -> bool {
    RESERVED_ACTIVITY_NAMES.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherAssignment {
    pub id: String,
    pub teacher_code: String,
    pub teacher_name: String,
    pub subjects: Vec<String>,
    pub grades: Vec<String>,
    pub classrooms: Vec<String>,
}

impl TeacherAssignment {
    pub fn covers(&self, grade: &str, classroom: &str) -> bool {
        covers(&self.grades, &self.classrooms, grade, classroom)
    }

    pub fn teaches(&self, subject: &str, grade: &str, classroom: &str) -> bool {
        self.subjects.iter().any(|s| s == subject) && self.covers(grade, classroom)
    }
}

fn covers(grades: &[String], classrooms: &[String], grade: &str, classroom: &str) -> bool {
    grades.iter().any(|g| g == grade) && classrooms.iter().any(|c| c == classroom)
}

/// Teaching scope left behind by an assignment whose teacher could not be
/// resolved. Its subjects still count as taught, but nobody is responsible.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnstaffedScope {
    pub assignment_id: String,
    pub subjects: Vec<String>,
    pub grades: Vec<String>,
    pub classrooms: Vec<String>,
}

impl UnstaffedScope {
    pub fn covers(&self, grade: &str, classroom: &str) -> bool {
        covers(&self.grades, &self.classrooms, grade, classroom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDefinition {
    pub subject: String,
    pub grade: String,
    pub classroom: String,
    pub period: i64,
    pub name: String,
    pub weight_percent: Option<f64>,
}

impl ActivityDefinition {
    /// Weight of an activity that already counts toward the period grade.
    /// Null and zero weights mean "not weighted yet".
    pub fn live_weight(&self) -> Option<f64> {
        self.weight_percent.filter(|w| *w > 0.0)
    }

    pub fn is_scoped_to(&self, subject: &str, grade: &str, classroom: &str, period: i64) -> bool {
        self.period == period
            && self.subject == subject
            && self.grade == grade
            && self.classroom == classroom
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub student_id: String,
    pub subject: String,
    pub grade: String,
    pub classroom: String,
    pub period: i64,
    pub activity_name: String,
    pub weight_percent: Option<f64>,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    pub grade: String,
    pub classroom: String,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.last_name, self.first_name)
    }
}

/// Staff directory entry referenced by an assignment row.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonRef {
    pub code: String,
    pub first_name: String,
    pub last_name: String,
}

/// Assignment as stored; `person` is `None` when the reference dangles.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentRow {
    pub id: String,
    pub person: Option<PersonRef>,
    pub subjects: Vec<String>,
    pub grades: Vec<String>,
    pub classrooms: Vec<String>,
}

impl AssignmentRow {
    pub fn resolve(self) -> Result<TeacherAssignment, UnstaffedScope> {
        let Some(person) = self.person else {
            return Err(UnstaffedScope {
                assignment_id: self.id,
                subjects: self.subjects,
                grades: self.grades,
                classrooms: self.classrooms,
            });
        };
        let teacher_name = format!("{} {}", person.first_name, person.last_name)
            .trim()
            .to_string();
        Ok(TeacherAssignment {
            id: self.id,
            teacher_code: person.code,
            teacher_name,
            subjects: self.subjects,
            grades: self.grades,
            classrooms: self.classrooms,
        })
    }
}
