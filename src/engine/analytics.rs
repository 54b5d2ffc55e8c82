//! Occupancy analytics: bucket reservations into fixed-width slots, per space,
//! then fold the per-space figures into a paginated report.

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use ulid::Ulid;
use uuid::Uuid;

use crate::limits::MAX_PAGE_SIZE;
use crate::model::*;

use super::error::DateRangeProblem;
use super::slots::floor_to_hour;
use super::EngineError;

pub const DEFAULT_PAGE: u32 = 0;
pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportQuery {
    pub restaurant_id: Ulid,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub space_id: Option<Uuid>,
    pub page: u32,
    pub size: u32,
}

impl ReportQuery {
    pub fn new(restaurant_id: Ulid, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            restaurant_id,
            start: Some(start),
            end: Some(end),
            space_id: None,
            page: DEFAULT_PAGE,
            size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn for_space(mut self, space_id: Uuid) -> Self {
        self.space_id = Some(space_id);
        self
    }

    pub fn page(mut self, page: u32, size: u32) -> Self {
        self.page = page;
        self.size = size;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSlotOccupancy {
    pub slot_start: NaiveDateTime,
    pub slot_end: NaiveDateTime,
    pub reservation_count: usize,
    pub occupancy: u32,
    pub max_capacity: u32,
    pub utilization_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpaceOccupancyReport {
    pub space_id: Uuid,
    pub space_name: String,
    pub max_capacity: u32,
    pub total_reservations: usize,
    pub total_guests: u64,
    pub peak_occupancy: u32,
    pub average_utilization: f64,
    pub hourly_breakdown: Vec<TimeSlotOccupancy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancySummary {
    pub total_reservations: usize,
    pub total_guests: u64,
    pub peak_occupancy: u32,
    pub average_utilization: f64,
    pub overall_utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancyReport {
    pub restaurant_id: Ulid,
    pub report_start_time: NaiveDateTime,
    pub report_end_time: NaiveDateTime,
    pub summary: OccupancySummary,
    pub space_reports: Vec<SpaceOccupancyReport>,
    pub page: u32,
    pub size: u32,
    pub total_elements: usize,
    pub total_pages: u32,
}

/// Half-up to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}

/// Both ends present, end strictly after start, whole-day span within `max_days`.
pub fn validate_range(
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    max_days: i64,
) -> Result<Span, EngineError> {
    let (Some(s), Some(e)) = (start, end) else {
        return Err(EngineError::InvalidDateRange {
            start,
            end,
            problem: DateRangeProblem::Missing,
        });
    };
    if e <= s {
        return Err(EngineError::InvalidDateRange {
            start,
            end,
            problem: DateRangeProblem::EndNotAfterStart,
        });
    }
    if (e - s).num_days() > max_days {
        return Err(EngineError::InvalidDateRange {
            start,
            end,
            problem: DateRangeProblem::TooLong { max_days },
        });
    }
    Ok(Span::new(s, e))
}

pub fn validate_pagination(page: u32, size: u32) -> Result<(), EngineError> {
    if size == 0 || size > MAX_PAGE_SIZE {
        return Err(EngineError::InvalidPagination { page, size });
    }
    Ok(())
}

/// Slots start at the top of the window's first hour and step by
/// `slot_minutes` until the window end; the last slot may run past it.
pub fn slot_breakdown(
    reservations: &[Reservation],
    window: &Span,
    max_capacity: u32,
    slot_minutes: u32,
) -> Vec<TimeSlotOccupancy> {
    let step = TimeDelta::minutes(slot_minutes as i64);
    let mut slots = Vec::new();
    let mut current = floor_to_hour(window.start);
    while current < window.end {
        let slot = Span::new(current, current + step);
        let (count, occupancy) = reservations
            .iter()
            .filter(|r| r.span.overlaps(&slot))
            .fold((0usize, 0u64), |(n, sum), r| (n + 1, sum + r.party_size as u64));
        slots.push(TimeSlotOccupancy {
            slot_start: slot.start,
            slot_end: slot.end,
            reservation_count: count,
            occupancy: u32::try_from(occupancy).unwrap_or(u32::MAX),
            max_capacity,
            utilization_percentage: percentage(occupancy, max_capacity as u64),
        });
        current = slot.end;
    }
    slots
}

/// `reservations` are the space's reservations overlapping `window`.
pub fn space_report(
    space: &Space,
    reservations: &[Reservation],
    window: &Span,
    slot_minutes: u32,
) -> SpaceOccupancyReport {
    let hourly_breakdown = slot_breakdown(reservations, window, space.max_capacity, slot_minutes);
    let peak_occupancy = hourly_breakdown.iter().map(|s| s.occupancy).max().unwrap_or(0);
    let average_utilization = round2(mean(hourly_breakdown.iter().map(|s| s.utilization_percentage)));
    SpaceOccupancyReport {
        space_id: space.id,
        space_name: space.name.clone(),
        max_capacity: space.max_capacity,
        total_reservations: reservations.len(),
        total_guests: reservations.iter().map(|r| r.party_size as u64).sum(),
        peak_occupancy,
        average_utilization,
        hourly_breakdown,
    }
}

/// The overall figure divides the largest single-space peak by the combined
/// capacity, so it understates simultaneous occupancy across spaces.
pub fn summarize(reports: &[SpaceOccupancyReport]) -> OccupancySummary {
    let peak_occupancy = reports.iter().map(|r| r.peak_occupancy).max().unwrap_or(0);
    let total_capacity: u64 = reports.iter().map(|r| r.max_capacity as u64).sum();
    OccupancySummary {
        total_reservations: reports.iter().map(|r| r.total_reservations).sum(),
        total_guests: reports.iter().map(|r| r.total_guests).sum(),
        peak_occupancy,
        average_utilization: round2(mean(reports.iter().map(|r| r.average_utilization))),
        overall_utilization: percentage(peak_occupancy as u64, total_capacity),
    }
}

/// Returns the requested page plus `(total_elements, total_pages)`.
/// A page past the end is empty, not an error.
pub fn paginate<T>(mut items: Vec<T>, page: u32, size: u32) -> (Vec<T>, usize, u32) {
    let total = items.len();
    let size = size.max(1) as usize;
    let total_pages = total.div_ceil(size) as u32;
    let from = (page as usize).saturating_mul(size).min(total);
    let to = (from + size).min(total);
    items.truncate(to);
    let page_items = items.split_off(from);
    (page_items, total, total_pages)
}

/// Assemble a report from already-fetched per-space reservations.
/// `scope` pairs each in-scope space with its reservations overlapping `window`.
pub fn build_report(
    restaurant_id: Ulid,
    window: Span,
    scope: &[(Space, Vec<Reservation>)],
    slot_minutes: u32,
    page: u32,
    size: u32,
) -> OccupancyReport {
    let all: Vec<SpaceOccupancyReport> = scope
        .iter()
        .map(|(space, reservations)| space_report(space, reservations, &window, slot_minutes))
        .collect();
    let summary = summarize(&all);
    let (space_reports, total_elements, total_pages) = paginate(all, page, size);
    OccupancyReport {
        restaurant_id,
        report_start_time: window.start,
        report_end_time: window.end,
        summary,
        space_reports,
        page,
        size,
        total_elements,
        total_pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::at;

    fn booked(space: &Space, start: NaiveDateTime, end: NaiveDateTime, party: u32) -> Reservation {
        Reservation {
            id: Ulid::new(),
            restaurant_id: Ulid::nil(),
            space_id: space.id,
            customer_email: "x@y.z".into(),
            span: Span::new(start, end),
            party_size: party,
            status: DEFAULT_STATUS.into(),
        }
    }

    #[test]
    fn rounding() {
        assert_eq!(round2(33.333333), 33.33);
        assert_eq!(round2(66.666666), 66.67);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn range_rules() {
        assert!(validate_range(Some(at(1, 0, 0)), Some(at(1, 1, 0)), 31).is_ok());
        assert!(matches!(
            validate_range(None, Some(at(1, 1, 0)), 31),
            Err(EngineError::InvalidDateRange { problem: DateRangeProblem::Missing, .. })
        ));
        assert!(matches!(
            validate_range(Some(at(1, 1, 0)), Some(at(1, 1, 0)), 31),
            Err(EngineError::InvalidDateRange { problem: DateRangeProblem::EndNotAfterStart, .. })
        ));
    }

    #[test]
    fn thirty_one_days_ok_thirty_two_not() {
        let start = at(1, 0, 0);
        assert!(validate_range(Some(start), Some(start + TimeDelta::days(31)), 31).is_ok());
        // partial days truncate
        assert!(validate_range(Some(start), Some(start + TimeDelta::days(31) + TimeDelta::hours(23)), 31).is_ok());
        match validate_range(Some(start), Some(start + TimeDelta::days(32)), 31) {
            Err(e @ EngineError::InvalidDateRange { .. }) => {
                assert!(e.to_string().contains("maximum allowed range of 31 days"), "{e}");
            }
            other => panic!("expected InvalidDateRange, got {other:?}"),
        }
    }

    #[test]
    fn pagination_args() {
        assert!(validate_pagination(0, 1).is_ok());
        assert!(validate_pagination(3, MAX_PAGE_SIZE).is_ok());
        assert!(validate_pagination(0, 0).is_err());
        assert!(validate_pagination(0, MAX_PAGE_SIZE + 1).is_err());
    }

    #[test]
    fn slots_start_at_the_top_of_the_hour() {
        let space = Space::for_tests("Hall", 1, 10);
        let window = Span::new(at(1, 12, 30), at(1, 15, 0));
        let slots = slot_breakdown(&[], &window, space.max_capacity, 60);
        let starts: Vec<_> = slots.iter().map(|s| s.slot_start).collect();
        assert_eq!(starts, vec![at(1, 12, 0), at(1, 13, 0), at(1, 14, 0)]);
    }

    #[test]
    fn slot_occupancy_and_utilization() {
        let space = Space::for_tests("Hall", 1, 10);
        let rs = vec![
            booked(&space, at(1, 12, 0), at(1, 14, 0), 4),
            booked(&space, at(1, 13, 0), at(1, 15, 0), 3),
        ];
        let window = Span::new(at(1, 12, 0), at(1, 15, 0));
        let slots = slot_breakdown(&rs, &window, 10, 60);
        let occ: Vec<_> = slots.iter().map(|s| (s.reservation_count, s.occupancy)).collect();
        assert_eq!(occ, vec![(1, 4), (2, 7), (1, 3)]);
        let util: Vec<_> = slots.iter().map(|s| s.utilization_percentage).collect();
        assert_eq!(util, vec![40.0, 70.0, 30.0]);

        let report = space_report(&space, &rs, &window, 60);
        assert_eq!(report.peak_occupancy, 7);
        assert_eq!(report.total_reservations, 2);
        assert_eq!(report.total_guests, 7);
        assert_eq!(report.average_utilization, 46.67);
    }

    #[test]
    fn zero_capacity_space_reports_zero_utilization() {
        let space = Space::for_tests("Closed", 0, 0);
        let rs = vec![booked(&space, at(1, 12, 0), at(1, 13, 0), 2)];
        let window = Span::new(at(1, 10, 0), at(1, 14, 0));
        let report = space_report(&space, &rs, &window, 60);
        assert!(report.hourly_breakdown.iter().all(|s| s.utilization_percentage == 0.0));
        assert_eq!(report.average_utilization, 0.0);
        let summary = summarize(&[report]);
        assert_eq!(summary.overall_utilization, 0.0);
    }

    #[test]
    fn summary_uses_the_largest_single_peak() {
        let a = Space::for_tests("A", 1, 10);
        let b = Space::for_tests("B", 1, 30);
        let window = Span::new(at(1, 12, 0), at(1, 14, 0));
        let ra = vec![booked(&a, at(1, 12, 0), at(1, 14, 0), 8)];
        let rb = vec![
            booked(&b, at(1, 12, 0), at(1, 13, 0), 6),
            booked(&b, at(1, 13, 0), at(1, 14, 0), 3),
        ];
        let reports = vec![space_report(&a, &ra, &window, 60), space_report(&b, &rb, &window, 60)];
        let summary = summarize(&reports);
        assert_eq!(summary.total_reservations, 3);
        assert_eq!(summary.total_guests, 17);
        assert_eq!(summary.peak_occupancy, 8);
        // A: 80, 80 -> 80.0 ; B: 20, 10 -> 15.0
        assert_eq!(summary.average_utilization, 47.5);
        // 8 / 40
        assert_eq!(summary.overall_utilization, 20.0);
    }

    #[test]
    fn pagination_over_two_spaces() {
        let a = Space::for_tests("A", 1, 10);
        let b = Space::for_tests("B", 1, 10);
        let window = Span::new(at(1, 12, 0), at(1, 13, 0));
        let scope = vec![(a.clone(), vec![]), (b.clone(), vec![])];

        let p0 = build_report(Ulid::nil(), window, &scope, 60, 0, 1);
        assert_eq!(p0.total_pages, 2);
        assert_eq!(p0.total_elements, 2);
        assert_eq!(p0.space_reports.len(), 1);
        assert_eq!(p0.space_reports[0].space_id, a.id);

        let p1 = build_report(Ulid::nil(), window, &scope, 60, 1, 1);
        assert_eq!(p1.space_reports[0].space_id, b.id);

        let p10 = build_report(Ulid::nil(), window, &scope, 60, 10, 1);
        assert!(p10.space_reports.is_empty());
        assert_eq!(p10.total_elements, 2);
        assert_eq!(p10.total_pages, 2);
    }

    #[test]
    fn paginate_partial_last_page() {
        let (items, total, pages) = paginate((0..7).collect::<Vec<_>>(), 2, 3);
        assert_eq!(items, vec![6]);
        assert_eq!((total, pages), (7, 3));
        let (items, total, pages) = paginate(Vec::<u8>::new(), 0, 10);
        assert!(items.is_empty());
        assert_eq!((total, pages), (0, 0));
    }
}
