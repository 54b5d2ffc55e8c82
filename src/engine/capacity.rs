use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Sum of party sizes of every reservation overlapping `span`.
pub fn calculate_occupancy(ledger: &SpaceLedger, span: &Span) -> u32 {
    occupancy_excluding(ledger, span, None)
}

pub(crate) fn occupancy_excluding(ledger: &SpaceLedger, span: &Span, exclude: Option<Ulid>) -> u32 {
    let total: u64 = ledger
        .overlapping(span)
        .filter(|r| Some(r.id) != exclude)
        .map(|r| r.party_size as u64)
        .sum();
    u32::try_from(total).unwrap_or(u32::MAX)
}

/// Never negative, even when the ledger is already over capacity.
pub fn available_capacity(ledger: &SpaceLedger, span: &Span, space: &Space) -> u32 {
    space
        .max_capacity
        .saturating_sub(calculate_occupancy(ledger, span))
}

/// Fails when admitting `candidate` would push concurrent occupancy over the
/// space's maximum. Filling the space exactly is allowed.
pub fn validate(ledger: &SpaceLedger, candidate: &Reservation, space: &Space) -> Result<(), EngineError> {
    check(ledger, candidate, space, None)
}

/// Like [`validate`], ignoring the stored copy of `exclude_id`, so a reservation
/// being rewritten does not count against itself.
pub fn validate_excluding(
    ledger: &SpaceLedger,
    candidate: &Reservation,
    space: &Space,
    exclude_id: Ulid,
) -> Result<(), EngineError> {
    check(ledger, candidate, space, Some(exclude_id))
}

fn check(
    ledger: &SpaceLedger,
    candidate: &Reservation,
    space: &Space,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let occupancy = occupancy_excluding(ledger, &candidate.span, exclude);
    if occupancy as u64 + candidate.party_size as u64 > space.max_capacity as u64 {
        return Err(EngineError::CapacityExceeded {
            restaurant_id: candidate.restaurant_id,
            space_id: space.id,
            span: candidate.span,
            party_size: candidate.party_size,
            occupancy,
            max_capacity: space.max_capacity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::at;
    use chrono::NaiveDateTime;

    fn reservation(space: &Space, start: NaiveDateTime, end: NaiveDateTime, party: u32) -> Reservation {
        Reservation {
            id: Ulid::new(),
            restaurant_id: Ulid::nil(),
            space_id: space.id,
            customer_email: "a@b.c".into(),
            span: Span::new(start, end),
            party_size: party,
            status: DEFAULT_STATUS.into(),
        }
    }

    #[test]
    fn occupancy_sums_overlaps_only() {
        let space = Space::for_tests("Terrace", 1, 10);
        let mut ledger = SpaceLedger::new();
        ledger.insert(reservation(&space, at(1, 10, 0), at(1, 12, 0), 3));
        ledger.insert(reservation(&space, at(1, 11, 0), at(1, 13, 0), 4));
        ledger.insert(reservation(&space, at(1, 13, 0), at(1, 14, 0), 5));

        assert_eq!(calculate_occupancy(&ledger, &Span::new(at(1, 11, 0), at(1, 12, 0))), 7);
        assert_eq!(calculate_occupancy(&ledger, &Span::new(at(1, 12, 0), at(1, 13, 0))), 4);
        assert_eq!(calculate_occupancy(&ledger, &Span::new(at(1, 14, 0), at(1, 15, 0))), 0);
    }

    #[test]
    fn exactly_full_is_accepted() {
        let space = Space::for_tests("Terrace", 1, 10);
        let mut ledger = SpaceLedger::new();
        ledger.insert(reservation(&space, at(1, 12, 0), at(1, 14, 0), 6));

        let fits = reservation(&space, at(1, 12, 0), at(1, 14, 0), 4);
        assert!(validate(&ledger, &fits, &space).is_ok());

        let too_many = reservation(&space, at(1, 12, 0), at(1, 14, 0), 5);
        match validate(&ledger, &too_many, &space) {
            Err(EngineError::CapacityExceeded { occupancy, max_capacity, party_size, .. }) => {
                assert_eq!((occupancy, max_capacity, party_size), (6, 10, 5));
            }
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }
    }

    #[test]
    fn excluding_ignores_own_prior_state() {
        let space = Space::for_tests("Terrace", 1, 10);
        let mut ledger = SpaceLedger::new();
        let existing = reservation(&space, at(1, 12, 0), at(1, 14, 0), 8);
        let id = existing.id;
        ledger.insert(existing);

        let mut grown = reservation(&space, at(1, 12, 0), at(1, 14, 0), 10);
        grown.id = id;
        assert!(validate(&ledger, &grown, &space).is_err());
        assert!(validate_excluding(&ledger, &grown, &space, id).is_ok());
    }

    #[test]
    fn available_never_negative() {
        let space = Space::for_tests("Booth", 1, 4);
        let mut ledger = SpaceLedger::new();
        ledger.insert(reservation(&space, at(1, 18, 0), at(1, 20, 0), 3));
        ledger.insert(reservation(&space, at(1, 18, 0), at(1, 20, 0), 3));
        let window = Span::new(at(1, 18, 0), at(1, 19, 0));
        assert_eq!(calculate_occupancy(&ledger, &window), 6);
        assert_eq!(available_capacity(&ledger, &window, &space), 0);

        let later = Span::new(at(1, 20, 0), at(1, 21, 0));
        assert_eq!(available_capacity(&ledger, &later, &space), 4);
    }
}
