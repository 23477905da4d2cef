#[path = "../src/schedule.rs"]
mod schedule;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use schedule::{adjust_dates, adjust_dates_at, reference_date, Enrollment, Exercise, Term};

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
        .single()
        .expect("valid date")
}

fn exercise(open: i64, due: i64, close: Option<i64>) -> Exercise {
    Exercise {
        id: "ex-1".to_string(),
        course_id: "course-1".to_string(),
        category_id: None,
        days_to_open: open,
        days_to_due: due,
        days_to_close: close,
        points: 10.0,
    }
}

fn enrolled_on(ts: DateTime<Utc>) -> Enrollment {
    Enrollment {
        enrolled_at: Some(ts),
        term: None,
    }
}

#[test]
fn enrollment_anchor_without_term_matches_reference_scenario() {
    let enrollment = enrolled_on(at(2024, 1, 1));
    let dates = adjust_dates_at(&exercise(0, 7, None), Some(&enrollment), at(2030, 1, 1));
    assert_eq!(dates.open_date, at(2024, 1, 1));
    assert_eq!(dates.due_date, at(2024, 1, 8));
    assert_eq!(dates.close_date, at(2024, 1, 15));
}

#[test]
fn term_start_overrides_enrollment_timestamp() {
    let enrollment = Enrollment {
        enrolled_at: Some(at(2024, 3, 20)),
        term: Some(Term {
            start_date: NaiveDate::from_ymd_opt(2024, 2, 5).expect("date"),
            end_date: NaiveDate::from_ymd_opt(2024, 6, 30),
        }),
    };
    let dates = adjust_dates_at(&exercise(3, 4, None), Some(&enrollment), at(2030, 1, 1));
    assert_eq!(dates.open_date, at(2024, 2, 8));
    assert_eq!(dates.due_date, at(2024, 2, 12));
    assert_eq!(dates.close_date, at(2024, 2, 19));
}

#[test]
fn missing_enrollment_counts_from_now() {
    let now = Utc
        .with_ymd_and_hms(2025, 5, 17, 13, 45, 0)
        .single()
        .expect("valid now");
    let dates = adjust_dates_at(&exercise(2, 5, None), None, now);
    assert_eq!(dates.open_date, now + Duration::days(2));
    assert_eq!(dates.due_date, now + Duration::days(7));

    let empty = Enrollment::default();
    let dates = adjust_dates_at(&exercise(0, 1, None), Some(&empty), now);
    assert_eq!(dates.open_date, now);
}

#[test]
fn explicit_close_counts_from_reference_not_due() {
    let reference = at(2024, 9, 2);
    let enrollment = enrolled_on(reference);
    // Due lands on day 30 but close is pinned to day 10 from the reference.
    let dates = adjust_dates_at(&exercise(10, 20, Some(10)), Some(&enrollment), at(2030, 1, 1));
    assert_eq!(dates.due_date, reference + Duration::days(30));
    assert_eq!(dates.close_date, reference + Duration::days(10));
    assert!(dates.close_date < dates.due_date);
}

#[test]
fn fallback_close_is_always_due_plus_seven() {
    let enrollment = enrolled_on(at(2024, 1, 1));
    for open in [0, 1, 5, 30] {
        for due in [0, 3, 14, 90] {
            let dates = adjust_dates_at(&exercise(open, due, None), Some(&enrollment), at(2030, 1, 1));
            assert_eq!(
                dates.close_date - dates.due_date,
                Duration::days(schedule::CLOSE_GRACE_DAYS),
                "open={} due={}",
                open,
                due
            );
        }
    }
}

#[test]
fn due_minus_open_equals_days_to_due_for_non_negative_offsets() {
    let enrollment = enrolled_on(at(2023, 11, 15));
    for open in [0, 2, 9] {
        for due in [0, 1, 7, 21] {
            let dates = adjust_dates_at(&exercise(open, due, Some(40)), Some(&enrollment), at(2030, 1, 1));
            assert_eq!(dates.due_date - dates.open_date, Duration::days(due));
        }
    }
}

#[test]
fn negative_offsets_clamp_to_reference() {
    let reference = at(2024, 4, 1);
    let enrollment = enrolled_on(reference);

    let dates = adjust_dates_at(&exercise(-5, 2, Some(-1)), Some(&enrollment), at(2030, 1, 1));
    assert_eq!(dates.open_date, reference);
    // -5 + 2 is still negative, so due clamps too.
    assert_eq!(dates.due_date, reference);
    assert_eq!(dates.close_date, reference);

    let dates = adjust_dates_at(&exercise(-2, 5, None), Some(&enrollment), at(2030, 1, 1));
    assert_eq!(dates.open_date, reference);
    assert_eq!(dates.due_date, reference + Duration::days(3));
    assert_eq!(dates.close_date, reference + Duration::days(10));
}

#[test]
fn open_never_precedes_reference() {
    let now = at(2026, 1, 1);
    let enrollment = enrolled_on(at(2024, 8, 30));
    let reference = reference_date(Some(&enrollment), now);
    for open in [-30, -1, 0, 1, 30] {
        for due in [-10, 0, 10] {
            let dates = adjust_dates_at(&exercise(open, due, None), Some(&enrollment), now);
            assert!(dates.open_date >= reference);
            assert!(dates.due_date >= reference);
        }
    }
}

#[test]
fn reference_prefers_term_then_enrollment_then_now() {
    let now = at(2030, 6, 1);
    let with_term = Enrollment {
        enrolled_at: Some(at(2024, 3, 10)),
        term: Some(Term {
            start_date: NaiveDate::from_ymd_opt(2024, 2, 1).expect("date"),
            end_date: None,
        }),
    };
    assert_eq!(reference_date(Some(&with_term), now), at(2024, 2, 1));
    assert_eq!(
        reference_date(Some(&enrolled_on(at(2024, 3, 10))), now),
        at(2024, 3, 10)
    );
    assert_eq!(reference_date(Some(&Enrollment::default()), now), now);
    assert_eq!(reference_date(None, now), now);
}

#[test]
fn huge_offsets_saturate_instead_of_panicking() {
    let dates = adjust_dates_at(
        &exercise(i64::MAX, i64::MAX, None),
        None,
        at(2024, 1, 1),
    );
    assert_eq!(dates.open_date, DateTime::<Utc>::MAX_UTC);
    assert_eq!(dates.due_date, DateTime::<Utc>::MAX_UTC);
    assert_eq!(dates.close_date, DateTime::<Utc>::MAX_UTC);
}

#[test]
fn clock_reading_variant_matches_fixed_clock_when_anchored() {
    let enrollment = enrolled_on(at(2024, 1, 1));
    let ex = exercise(1, 6, Some(12));
    assert_eq!(
        adjust_dates(&ex, Some(&enrollment)),
        adjust_dates_at(&ex, Some(&enrollment), at(1999, 1, 1))
    );
}
