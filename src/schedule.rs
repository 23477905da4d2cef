use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of one category's slice of the sort-key space.
pub const CATEGORY_STRIDE: i64 = 1000;

/// First key handed to exercises that have no category.
pub const UNCATEGORIZED_BASE: i64 = 999_999;

/// Days between the due date and the fallback close date.
pub const CLOSE_GRACE_DAYS: i64 = 7;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub id: String,
    pub course_id: String,
    pub category_id: Option<String>,
    #[serde(default)]
    pub days_to_open: i64,
    #[serde(default)]
    pub days_to_due: i64,
    pub days_to_close: Option<i64>,
    #[serde(default)]
    pub points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Term {
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub enrolled_at: Option<DateTime<Utc>>,
    pub term: Option<Term>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub score: Option<f64>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseDates {
    pub open_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub close_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    NotStarted,
    Pending,
    Completed,
}

/// Where `now` falls relative to an exercise's open/close window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Upcoming,
    Open,
    Closed,
}

/// The anchor every offset is counted from: the term start when the
/// enrollment has a term, else the enrollment timestamp, else `now`.
pub fn reference_date(enrollment: Option<&Enrollment>, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(enrollment) = enrollment else {
        return now;
    };
    if let Some(term) = enrollment.term.as_ref() {
        return Utc.from_utc_datetime(&term.start_date.and_time(NaiveTime::MIN));
    }
    enrollment.enrolled_at.unwrap_or(now)
}

fn add_days(base: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    ChronoDuration::try_days(days)
        .and_then(|d| base.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Computes a student's effective dates for one exercise.
///
/// Due compounds on open (`days_to_open + days_to_due`), while an explicit
/// close offset counts from the reference date. Without one the close date
/// trails the due date by [`CLOSE_GRACE_DAYS`].
pub fn adjust_dates_at(
    exercise: &Exercise,
    enrollment: Option<&Enrollment>,
    now: DateTime<Utc>,
) -> ExerciseDates {
    let reference = reference_date(enrollment, now);

    let open_date = add_days(reference, exercise.days_to_open.max(0));
    let due_date = add_days(
        reference,
        exercise
            .days_to_open
            .saturating_add(exercise.days_to_due)
            .max(0),
    );
    let close_date = match exercise.days_to_close {
        Some(days) => add_days(reference, days.max(0)),
        None => add_days(due_date, CLOSE_GRACE_DAYS),
    };

    ExerciseDates {
        open_date,
        due_date,
        close_date,
    }
}

/// Same as [`adjust_dates_at`] against the system clock. Callers that need
/// one consistent `now` across several rules use `adjust_dates_at`.
#[allow(dead_code)]
pub fn adjust_dates(exercise: &Exercise, enrollment: Option<&Enrollment>) -> ExerciseDates {
    adjust_dates_at(exercise, enrollment, Utc::now())
}

/// Snapshot status for one student and exercise.
///
/// The window is accepted but does not affect the result: a missing
/// submission is `NotStarted` before opening and after closing alike.
/// Use [`availability`] to report the window separately.
pub fn classify(
    submission: Option<&Submission>,
    _open_date: DateTime<Utc>,
    _close_date: DateTime<Utc>,
) -> SubmissionStatus {
    match submission {
        Some(s) if s.score.is_some() => SubmissionStatus::Completed,
        Some(_) => SubmissionStatus::Pending,
        None => SubmissionStatus::NotStarted,
    }
}

pub fn availability(dates: &ExerciseDates, now: DateTime<Utc>) -> Availability {
    if now < dates.open_date {
        Availability::Upcoming
    } else if now > dates.close_date {
        Availability::Closed
    } else {
        Availability::Open
    }
}

/// Dense sort key for an exercise.
///
/// Categorized: `category_order * 1000 + index`. Uncategorized exercises
/// start at 999999 and ignore `category_order`. No bounds are applied; see
/// [`checked_sort_key`].
pub fn sort_key(category_order: i64, index_in_category: i64, is_uncategorized: bool) -> i64 {
    if is_uncategorized {
        UNCATEGORIZED_BASE.saturating_add(index_in_category)
    } else {
        category_order
            .saturating_mul(CATEGORY_STRIDE)
            .saturating_add(index_in_category)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SortKeyError {
    #[error("negative position (category order {category_order}, index {index})")]
    Negative { category_order: i64, index: i64 },
    #[error("index {index} does not fit a category of {stride} slots")]
    IndexOverflow { index: i64, stride: i64 },
    #[error("key {key} reaches the uncategorized range starting at {base}")]
    EntersUncategorizedRange { key: i64, base: i64 },
}

/// Same key as [`sort_key`], but rejects positions whose key could collide
/// with another category or with the uncategorized range.
pub fn checked_sort_key(category_order: Option<i64>, index: i64) -> Result<i64, SortKeyError> {
    let order = category_order.unwrap_or(0);
    if index < 0 || order < 0 {
        return Err(SortKeyError::Negative {
            category_order: order,
            index,
        });
    }
    let Some(order) = category_order else {
        return Ok(sort_key(0, index, true));
    };
    if index >= CATEGORY_STRIDE {
        return Err(SortKeyError::IndexOverflow {
            index,
            stride: CATEGORY_STRIDE,
        });
    }
    let key = sort_key(order, index, false);
    if key >= UNCATEGORIZED_BASE {
        return Err(SortKeyError::EntersUncategorizedRange {
            key,
            base: UNCATEGORIZED_BASE,
        });
    }
    Ok(key)
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryLayout {
    pub category_id: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub exercise_ids: Vec<String>,
}

/// Full ordering of one course: categories with their exercises in display
/// order, then the exercises that belong to no category.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseLayout {
    #[serde(default)]
    pub categories: Vec<CategoryLayout>,
    #[serde(default)]
    pub uncategorized: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SortKeyAssignment {
    pub exercise_id: String,
    pub category_id: Option<String>,
    pub sort_key: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<SortKeyError>,
}

/// Re-derives the key of every exercise in the layout.
pub fn assign_sort_keys(layout: &CourseLayout) -> Vec<SortKeyAssignment> {
    let mut out = Vec::new();
    for category in &layout.categories {
        for (idx, exercise_id) in category.exercise_ids.iter().enumerate() {
            let idx = idx as i64;
            out.push(SortKeyAssignment {
                exercise_id: exercise_id.clone(),
                category_id: Some(category.category_id.clone()),
                sort_key: sort_key(category.order, idx, false),
                warning: checked_sort_key(Some(category.order), idx).err(),
            });
        }
    }
    for (idx, exercise_id) in layout.uncategorized.iter().enumerate() {
        let idx = idx as i64;
        out.push(SortKeyAssignment {
            exercise_id: exercise_id.clone(),
            category_id: None,
            sort_key: sort_key(0, idx, true),
            warning: checked_sort_key(None, idx).err(),
        });
    }
    out
}

