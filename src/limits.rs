/// Hard ceilings on stored entities and request inputs.

pub const MAX_RESTAURANTS: usize = 10_000;
pub const MAX_SPACES_PER_RESTAURANT: usize = 256;
pub const MAX_RESERVATIONS_PER_SPACE: usize = 100_000;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_ADDRESS_LEN: usize = 512;
pub const MAX_CUISINE_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_STATUS_LEN: usize = 32;

/// One day; a slot can never be longer than the day it lives in.
pub const MAX_SLOT_MINUTES: u32 = 24 * 60;

pub const MAX_PAGE_SIZE: u32 = 1_000;

/// One year; longer report cache lifetimes are a configuration mistake.
pub const MAX_CACHE_TTL_MINUTES: u64 = 365 * 24 * 60;
