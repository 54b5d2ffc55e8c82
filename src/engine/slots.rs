//! Slot-grid arithmetic. Slots are counted from the top of each hour.

use chrono::{NaiveDateTime, TimeDelta, Timelike};

/// Drop seconds and sub-second precision.
fn to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t - TimeDelta::seconds(t.second() as i64) - TimeDelta::nanoseconds(t.nanosecond() as i64)
}

pub fn floor_to_hour(t: NaiveDateTime) -> NaiveDateTime {
    to_minute(t) - TimeDelta::minutes(t.minute() as i64)
}

fn slot_floor(t: NaiveDateTime, slot_minutes: u32) -> (NaiveDateTime, u32) {
    let rem = t.minute() % slot_minutes;
    (to_minute(t) - TimeDelta::minutes(rem as i64), rem)
}

/// Round to the nearest slot boundary; exactly half a slot rounds up.
pub fn align_start(t: NaiveDateTime, slot_minutes: u32) -> NaiveDateTime {
    let (floor, rem) = slot_floor(t, slot_minutes);
    if 2 * rem >= slot_minutes {
        floor + TimeDelta::minutes(slot_minutes as i64)
    } else {
        floor
    }
}

/// Ceiling to the next slot boundary; a time already on a boundary is kept.
pub fn align_end(t: NaiveDateTime, slot_minutes: u32) -> NaiveDateTime {
    if is_aligned(t, slot_minutes) {
        return t;
    }
    let (floor, _) = slot_floor(t, slot_minutes);
    floor + TimeDelta::minutes(slot_minutes as i64)
}

pub fn is_aligned(t: NaiveDateTime, slot_minutes: u32) -> bool {
    t.minute() % slot_minutes == 0 && t.second() == 0 && t.nanosecond() == 0
}
