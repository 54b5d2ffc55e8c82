//! Reservation admission: the ordered checks a request passes before the
//! capacity check and the write. First failure wins.

use chrono::NaiveDateTime;

use crate::config::{Schedule, SpaceDefaults};
use crate::limits::{MAX_EMAIL_LEN, MAX_STATUS_LEN};
use crate::model::*;

use super::slots::{align_end, align_start};
use super::EngineError;

/// A request that passed every check except capacity.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub space: Space,
    pub schedule: Schedule,
    pub span: Span,
}

/// Shape checks on the raw request, before any lookup.
pub fn validate_draft(draft: &ReservationDraft) -> Result<(), EngineError> {
    validate_email(&draft.customer_email)?;
    if draft.party_size == 0 {
        return Err(EngineError::InvalidInput("party size must be positive".into()));
    }
    if let Some(status) = &draft.status
        && (status.trim().is_empty() || status.len() > MAX_STATUS_LEN)
    {
        return Err(EngineError::InvalidInput(format!(
            "status must be 1-{MAX_STATUS_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), EngineError> {
    let invalid = || EngineError::InvalidInput(format!("customer email {email:?} is not a valid address"));
    if email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => Ok(()),
        _ => Err(invalid()),
    }
}

/// Steps after the restaurant lookup: space, single day, alignment, duration,
/// operating hours, party size.
pub fn admit(
    restaurant: &Restaurant,
    draft: &ReservationDraft,
    defaults: &SpaceDefaults,
) -> Result<Admitted, EngineError> {
    let space = restaurant
        .space(&draft.space_id)
        .ok_or(EngineError::SpaceNotFound {
            restaurant_id: restaurant.id,
            space_id: draft.space_id,
        })?;

    check_single_day(draft.start, draft.end)?;

    let schedule = defaults.resolve(space);
    let start = align_start(draft.start, schedule.slot_minutes);
    let end = align_end(draft.end, schedule.slot_minutes);

    check_duration(start, end, schedule.slot_minutes)?;
    let span = Span::new(start, end);
    check_operating_hours(&span, &schedule)?;
    check_party_size(draft.party_size, space)?;

    Ok(Admitted {
        space: space.clone(),
        schedule,
        span,
    })
}

/// Compares the raw request dates, before alignment.
pub fn check_single_day(start: NaiveDateTime, end: NaiveDateTime) -> Result<(), EngineError> {
    if start.date() != end.date() {
        return Err(EngineError::MultiDayReservation { start, end });
    }
    Ok(())
}

pub fn check_duration(start: NaiveDateTime, end: NaiveDateTime, slot_minutes: u32) -> Result<(), EngineError> {
    if (end - start).num_minutes() < slot_minutes as i64 {
        return Err(EngineError::InvalidReservationDuration {
            min_minutes: slot_minutes,
        });
    }
    Ok(())
}

/// Time-of-day only; both boundaries are inclusive. An aligned end that
/// rolled into the next day can never fit inside one day's hours.
pub fn check_operating_hours(span: &Span, schedule: &Schedule) -> Result<(), EngineError> {
    let (start, end) = (span.start.time(), span.end.time());
    let rolled_over = span.end.date() != span.start.date();
    if rolled_over || start < schedule.opens || end > schedule.closes {
        return Err(EngineError::OutsideOperatingHours {
            start,
            end,
            opens: schedule.opens,
            closes: schedule.closes,
        });
    }
    Ok(())
}

pub fn check_party_size(party_size: u32, space: &Space) -> Result<(), EngineError> {
    if party_size < space.min_capacity || party_size > space.max_capacity {
        return Err(EngineError::InvalidPartySize {
            party_size,
            min: space.min_capacity,
            max: space.max_capacity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::hm;
    use crate::model::test_support::at;
    use ulid::Ulid;
    use uuid::Uuid;

    fn restaurant_with(space: Space) -> Restaurant {
        Restaurant {
            id: Ulid::new(),
            name: "Brasserie".into(),
            address: "2 Rue Neuve".into(),
            cuisine_type: "French".into(),
            capacity: 120,
            spaces: vec![space],
        }
    }

    fn draft(r: &Restaurant, start: NaiveDateTime, end: NaiveDateTime, party: u32) -> ReservationDraft {
        ReservationDraft {
            restaurant_id: r.id,
            space_id: r.spaces[0].id,
            customer_email: "diner@example.com".into(),
            start,
            end,
            party_size: party,
            status: None,
        }
    }

    #[test]
    fn aligns_and_accepts_the_canonical_request() {
        let r = restaurant_with(Space::for_tests("Salon", 2, 10));
        let ok = admit(&r, &draft(&r, at(1, 12, 17), at(1, 14, 17), 4), &SpaceDefaults::default()).unwrap();
        assert_eq!(ok.span, Span::new(at(1, 12, 0), at(1, 15, 0)));
        assert_eq!(ok.schedule.slot_minutes, 60);
    }

    #[test]
    fn unknown_space() {
        let r = restaurant_with(Space::for_tests("Salon", 2, 10));
        let mut d = draft(&r, at(1, 12, 0), at(1, 14, 0), 4);
        d.space_id = Uuid::new_v4();
        assert!(matches!(
            admit(&r, &d, &SpaceDefaults::default()),
            Err(EngineError::SpaceNotFound { .. })
        ));
    }

    #[test]
    fn multi_day_checked_before_alignment() {
        let r = restaurant_with(Space::for_tests("Salon", 2, 10));
        let d = draft(&r, at(1, 21, 0), at(2, 0, 30), 4);
        assert!(matches!(
            admit(&r, &d, &SpaceDefaults::default()),
            Err(EngineError::MultiDayReservation { .. })
        ));
    }

    #[test]
    fn alignment_can_collapse_a_short_window() {
        let r = restaurant_with(Space::for_tests("Salon", 2, 10));
        // 12:40 rounds up to 13:00; 13:00 stays; zero-length after alignment
        let d = draft(&r, at(1, 12, 40), at(1, 13, 0), 4);
        match admit(&r, &d, &SpaceDefaults::default()) {
            Err(EngineError::InvalidReservationDuration { min_minutes }) => assert_eq!(min_minutes, 60),
            other => panic!("expected InvalidReservationDuration, got {other:?}"),
        }
    }

    #[test]
    fn inverted_window_is_a_duration_failure() {
        let r = restaurant_with(Space::for_tests("Salon", 2, 10));
        let d = draft(&r, at(1, 15, 0), at(1, 13, 0), 4);
        assert!(matches!(
            admit(&r, &d, &SpaceDefaults::default()),
            Err(EngineError::InvalidReservationDuration { .. })
        ));
    }

    #[test]
    fn operating_hours_boundaries_inclusive() {
        let r = restaurant_with(Space::for_tests("Salon", 2, 10));
        let defaults = SpaceDefaults::default();
        assert!(admit(&r, &draft(&r, at(1, 9, 0), at(1, 22, 0), 4), &defaults).is_ok());
        assert!(matches!(
            admit(&r, &draft(&r, at(1, 8, 0), at(1, 10, 0), 4), &defaults),
            Err(EngineError::OutsideOperatingHours { .. })
        ));
        assert!(matches!(
            admit(&r, &draft(&r, at(1, 20, 0), at(1, 22, 1), 4), &defaults),
            Err(EngineError::OutsideOperatingHours { .. })
        ));
    }

    #[test]
    fn one_minute_outside_on_a_fine_grid() {
        let mut space = Space::for_tests("Counter", 1, 6);
        space.slot_minutes = Some(1);
        let r = restaurant_with(space);
        let defaults = SpaceDefaults::default();
        assert!(admit(&r, &draft(&r, at(1, 9, 0), at(1, 22, 0), 2), &defaults).is_ok());
        assert!(admit(&r, &draft(&r, at(1, 8, 59), at(1, 10, 0), 2), &defaults).is_err());
        assert!(admit(&r, &draft(&r, at(1, 21, 0), at(1, 22, 1), 2), &defaults).is_err());
    }

    #[test]
    fn end_rolling_past_midnight_is_rejected() {
        let mut space = Space::for_tests("Bar", 1, 6);
        space.operating_start = Some(hm(18, 0));
        space.operating_end = Some(hm(23, 59));
        let r = restaurant_with(space);
        let d = draft(&r, at(1, 22, 0), at(1, 23, 50), 2);
        assert!(matches!(
            admit(&r, &d, &SpaceDefaults::default()),
            Err(EngineError::OutsideOperatingHours { .. })
        ));
    }

    #[test]
    fn party_size_bounds() {
        let r = restaurant_with(Space::for_tests("Salon", 2, 10));
        let defaults = SpaceDefaults::default();
        assert!(admit(&r, &draft(&r, at(1, 12, 0), at(1, 13, 0), 2), &defaults).is_ok());
        assert!(admit(&r, &draft(&r, at(1, 12, 0), at(1, 13, 0), 10), &defaults).is_ok());
        match admit(&r, &draft(&r, at(1, 12, 0), at(1, 13, 0), 11), &defaults) {
            Err(e @ EngineError::InvalidPartySize { .. }) => {
                assert_eq!(e.to_string(), "Party size 11 is outside the space capacity range of 2-10");
            }
            other => panic!("expected InvalidPartySize, got {other:?}"),
        }
        assert!(admit(&r, &draft(&r, at(1, 12, 0), at(1, 13, 0), 1), &defaults).is_err());
    }

    #[test]
    fn space_override_slot_is_used() {
        let mut space = Space::for_tests("Garden", 2, 10);
        space.slot_minutes = Some(30);
        let r = restaurant_with(space);
        let ok = admit(&r, &draft(&r, at(1, 18, 10), at(1, 18, 50), 2), &SpaceDefaults::default()).unwrap();
        assert_eq!(ok.span, Span::new(at(1, 18, 0), at(1, 19, 0)));
    }

    #[test]
    fn email_shapes() {
        assert!(validate_email("a@b").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("someone@").is_err());
        assert!(validate_email("a@b@c").is_err());
        assert!(validate_email("a b@c.d").is_err());
    }

    #[test]
    fn draft_rejects_zero_party() {
        let r = restaurant_with(Space::for_tests("Salon", 2, 10));
        let d = draft(&r, at(1, 12, 0), at(1, 13, 0), 0);
        assert!(matches!(validate_draft(&d), Err(EngineError::InvalidInput(_))));
    }
}
