use crate::loader::{Collection, Snapshot};
use crate::model::{is_reserved_activity, ActivityDefinition, Student};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Hard cap on findings per query, across every group, subject and period.
pub const MAX_FINDINGS: usize = 100;
pub const PERIODS: [i64; 4] = [1, 2, 3, 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    Institution,
    Grade,
    Classroom,
    Subject,
    Student,
}

impl ScopeLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "institution" | "institucion" => Some(Self::Institution),
            "grade" | "grado" => Some(Self::Grade),
            "classroom" | "salon" => Some(Self::Classroom),
            "subject" | "materia" => Some(Self::Subject),
            "student" | "estudiante" => Some(Self::Student),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodScope {
    Single(i64),
    Annual,
}

impl PeriodScope {
    pub fn periods(self) -> Vec<i64> {
        match self {
            Self::Single(p) => vec![p],
            Self::Annual => PERIODS.to_vec(),
        }
    }
}

/// Scope of one completeness check. `level` is informational: only the
/// filters that are present narrow the result.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletenessQuery {
    pub level: ScopeLevel,
    pub period: PeriodScope,
    pub grade: Option<String>,
    pub classroom: Option<String>,
    pub subject: Option<String>,
    pub student_id: Option<String>,
}

impl CompletenessQuery {
    pub fn new(level: ScopeLevel, period: PeriodScope) -> Self {
        Self {
            level,
            period,
            grade: None,
            classroom: None,
            subject: None,
            student_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FindingKind {
    #[serde(rename = "porcentaje_incompleto")]
    WeightIncomplete,
    #[serde(rename = "nota_faltante")]
    MissingGrade,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    #[serde(rename = "tipo")]
    pub kind: FindingKind,
    #[serde(rename = "materia")]
    pub subject: String,
    #[serde(rename = "profesor", skip_serializing_if = "Option::is_none")]
    pub teacher: Option<String>,
    #[serde(rename = "grado")]
    pub grade: String,
    #[serde(rename = "salon")]
    pub classroom: String,
    #[serde(rename = "periodo")]
    pub period: i64,
    #[serde(rename = "estudiante", skip_serializing_if = "Option::is_none")]
    pub student: Option<String>,
    #[serde(rename = "estudianteId", skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(rename = "actividad", skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(rename = "porcentajeFaltante", skip_serializing_if = "Option::is_none")]
    pub missing_percent: Option<i64>,
}

/// Distinct values seen in the reported findings. Computed from the capped
/// list only, so a truncated result understates the true scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    #[serde(rename = "materiasIncompletas")]
    pub incomplete_subjects: usize,
    #[serde(rename = "profesoresPendientes")]
    pub pending_teachers: Vec<String>,
    #[serde(rename = "gradosAfectados")]
    pub affected_grades: Vec<String>,
    #[serde(rename = "salonesAfectados")]
    pub affected_classrooms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletenessReport {
    pub complete: bool,
    pub details: Vec<Finding>,
    pub summary: Summary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamError {
    pub code: &'static str,
    pub message: String,
}

impl ParamError {
    fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
        }
    }
}

fn parse_period(raw: Option<&serde_json::Value>) -> Result<PeriodScope, ParamError> {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Err(ParamError::bad_params("missing period"));
    };
    let whole = raw
        .as_i64()
        .or_else(|| raw.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64));
    if let Some(n) = whole {
        if PERIODS.contains(&n) {
            return Ok(PeriodScope::Single(n));
        }
        return Err(ParamError::bad_params("period must be 1..=4 or 'anual'"));
    }
    let Some(s) = raw.as_str() else {
        return Err(ParamError::bad_params("period must be 1..=4 or 'anual'"));
    };
    let t = s.trim();
    if t.eq_ignore_ascii_case("anual") || t.eq_ignore_ascii_case("annual") {
        return Ok(PeriodScope::Annual);
    }
    match t.parse::<i64>() {
        Ok(n) if PERIODS.contains(&n) => Ok(PeriodScope::Single(n)),
        _ => Err(ParamError::bad_params("period must be 1..=4 or 'anual'")),
    }
}

fn parse_optional_filter(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<String>, ParamError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(serde_json::Value::Number(n)) if key == "studentId" => Ok(Some(n.to_string())),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(ParamError::bad_params(format!(
                    "{} must be string or null",
                    key
                )));
            };
            if s.trim().is_empty() {
                Ok(None)
            } else {
                Ok(Some(s.to_string()))
            }
        }
    }
}

pub fn parse_query(params: &serde_json::Value) -> Result<CompletenessQuery, ParamError> {
    let Some(obj) = params.as_object() else {
        return Err(ParamError::bad_params("params must be an object"));
    };
    let level = obj
        .get("level")
        .and_then(|v| v.as_str())
        .and_then(ScopeLevel::parse)
        .ok_or_else(|| {
            ParamError::bad_params(
                "level must be one of: institution, grade, classroom, subject, student",
            )
        })?;
    let period = parse_period(obj.get("period"))?;
    let mut query = CompletenessQuery::new(level, period);
    query.grade = parse_optional_filter(obj, "grade")?;
    query.classroom = parse_optional_filter(obj, "classroom")?;
    query.subject = parse_optional_filter(obj, "subject")?;
    query.student_id = parse_optional_filter(obj, "studentId")?;
    Ok(query)
}

fn matches_filter(filter: &Option<String>, value: &str) -> bool {
    filter.as_deref().map(|f| f == value).unwrap_or(true)
}

struct FindingCollector {
    findings: Vec<Finding>,
    subjects: BTreeSet<String>,
    teachers: BTreeSet<String>,
    grades: BTreeSet<String>,
    classrooms: BTreeSet<String>,
}

impl FindingCollector {
    fn new() -> Self {
        Self {
            findings: Vec::new(),
            subjects: BTreeSet::new(),
            teachers: BTreeSet::new(),
            grades: BTreeSet::new(),
            classrooms: BTreeSet::new(),
        }
    }

    /// Returns false, without recording, once the cap is reached.
    fn push(&mut self, finding: Finding) -> bool {
        if self.findings.len() >= MAX_FINDINGS {
            return false;
        }
        self.subjects.insert(finding.subject.clone());
        if let Some(t) = &finding.teacher {
            self.teachers.insert(t.clone());
        }
        self.grades.insert(finding.grade.clone());
        self.classrooms.insert(finding.classroom.clone());
        self.findings.push(finding);
        true
    }

    fn finish(self) -> CompletenessReport {
        CompletenessReport {
            complete: self.findings.is_empty(),
            summary: Summary {
                incomplete_subjects: self.subjects.len(),
                pending_teachers: self.teachers.into_iter().collect(),
                affected_grades: self.grades.into_iter().collect(),
                affected_classrooms: self.classrooms.into_iter().collect(),
            },
            details: self.findings,
        }
    }
}

struct Group<'a> {
    grade: &'a str,
    classroom: &'a str,
    roster: Vec<&'a Student>,
}

/// Students grouped by (grade, classroom), groups in first-seen order.
fn group_students<'a>(students: impl Iterator<Item = &'a Student>) -> Vec<Group<'a>> {
    let mut groups: Vec<Group<'a>> = Vec::new();
    let mut index: HashMap<(&'a str, &'a str), usize> = HashMap::new();
    for s in students {
        let key = (s.grade.as_str(), s.classroom.as_str());
        let idx = *index.entry(key).or_insert_with(|| {
            groups.push(Group {
                grade: key.0,
                classroom: key.1,
                roster: Vec::new(),
            });
            groups.len() - 1
        });
        groups[idx].roster.push(s);
    }
    groups
}

/// Subjects taught in a grade/classroom, deduplicated in discovery order
/// (staffed assignments first, then scopes whose teacher is unknown).
fn subjects_taught<'a>(
    snapshot: &'a Snapshot,
    grade: &str,
    classroom: &str,
    subject_filter: Option<&str>,
) -> Vec<&'a str> {
    let staffed = snapshot
        .assignments
        .iter()
        .filter(|a| a.covers(grade, classroom))
        .map(|a| &a.subjects);
    let unstaffed = snapshot
        .unstaffed
        .iter()
        .filter(|u| u.covers(grade, classroom))
        .map(|u| &u.subjects);

    let mut seen: HashSet<&'a str> = HashSet::new();
    let mut subjects: Vec<&'a str> = Vec::new();
    for s in staffed.chain(unstaffed).flatten() {
        if subject_filter.map(|f| f == s.as_str()).unwrap_or(true) && seen.insert(s.as_str()) {
            subjects.push(s.as_str());
        }
    }
    subjects
}

fn responsible_teacher(
    snapshot: &Snapshot,
    subject: &str,
    grade: &str,
    classroom: &str,
) -> Option<String> {
    snapshot
        .assignments
        .iter()
        .find(|a| a.teaches(subject, grade, classroom))
        .map(|a| a.teacher_name.clone())
}

fn live_activities<'a>(
    snapshot: &'a Snapshot,
    subject: &str,
    grade: &str,
    classroom: &str,
    period: i64,
) -> Vec<&'a ActivityDefinition> {
    snapshot
        .activities
        .iter()
        .filter(|a| {
            a.is_scoped_to(subject, grade, classroom, period) && a.live_weight().is_some()
        })
        .collect()
}

type GradeKey<'a> = (&'a str, &'a str, &'a str, &'a str, i64, &'a str);

pub fn verify_completeness(snapshot: &Snapshot, query: &CompletenessQuery) -> CompletenessReport {
    let periods = query.period.periods();
    let groups = group_students(snapshot.students.iter().filter(|s| {
        matches_filter(&query.grade, &s.grade)
            && matches_filter(&query.classroom, &s.classroom)
            && matches_filter(&query.student_id, &s.student_id)
    }));

    let graded: HashSet<GradeKey<'_>> = snapshot
        .grades
        .iter()
        .map(|g| {
            (
                g.student_id.as_str(),
                g.subject.as_str(),
                g.grade.as_str(),
                g.classroom.as_str(),
                g.period,
                g.activity_name.as_str(),
            )
        })
        .collect();

    // Without grade data a missing grade cannot be told apart from a failed
    // fetch; report nothing rather than every grade.
    let grades_loaded = !snapshot.failed.contains(&Collection::Grades);

    let mut collector = FindingCollector::new();
    let mut truncated = false;

    'groups: for group in &groups {
        let subjects = subjects_taught(
            snapshot,
            group.grade,
            group.classroom,
            query.subject.as_deref(),
        );
        for subject in subjects {
            let teacher = responsible_teacher(snapshot, subject, group.grade, group.classroom);
            for &period in &periods {
                let activities =
                    live_activities(snapshot, subject, group.grade, group.classroom, period);
                if activities.is_empty() {
                    continue;
                }

                let total: f64 = activities.iter().filter_map(|a| a.live_weight()).sum();
                let rounded = total.round() as i64;
                if rounded < 100 {
                    let finding = Finding {
                        kind: FindingKind::WeightIncomplete,
                        subject: subject.to_string(),
                        teacher: teacher.clone(),
                        grade: group.grade.to_string(),
                        classroom: group.classroom.to_string(),
                        period,
                        student: None,
                        student_id: None,
                        activity: None,
                        missing_percent: Some(100 - rounded),
                    };
                    if !collector.push(finding) {
                        truncated = true;
                        break 'groups;
                    }
                }

                if !grades_loaded {
                    continue;
                }
                // Reserved totals weigh in but are computed, never graded.
                let gradable: Vec<&ActivityDefinition> = activities
                    .iter()
                    .copied()
                    .filter(|a| !is_reserved_activity(&a.name))
                    .collect();
                for student in &group.roster {
                    for activity in &gradable {
                        let key = (
                            student.student_id.as_str(),
                            subject,
                            group.grade,
                            group.classroom,
                            period,
                            activity.name.as_str(),
                        );
                        if graded.contains(&key) {
                            continue;
                        }
                        let finding = Finding {
                            kind: FindingKind::MissingGrade,
                            subject: subject.to_string(),
                            teacher: teacher.clone(),
                            grade: group.grade.to_string(),
                            classroom: group.classroom.to_string(),
                            period,
                            student: Some(student.display_name()),
                            student_id: Some(student.student_id.clone()),
                            activity: Some(activity.name.clone()),
                            missing_percent: None,
                        };
                        if !collector.push(finding) {
                            truncated = true;
                            break 'groups;
                        }
                    }
                }
            }
        }
    }

    let report = collector.finish();
    // A capped report looks the same as one with exactly MAX_FINDINGS issues;
    // only the log records the difference.
    if truncated {
        tracing::info!(
            scope = ?query.level,
            cap = MAX_FINDINGS,
            "completeness findings truncated"
        );
    }
    tracing::debug!(
        scope = ?query.level,
        period = ?query.period,
        groups = groups.len(),
        findings = report.details.len(),
        "completeness verified"
    );
    report
}
