//! One-time fixture loader. Runs at startup when a seed file is configured
//! and the replayed store holds no restaurants.

use std::path::Path;

use serde::Deserialize;
use ulid::Ulid;
use uuid::Uuid;

use crate::engine::{Engine, EngineError};
use crate::model::*;

#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub restaurants: Vec<SeedRestaurant>,
    #[serde(default)]
    pub reservations: Vec<SeedReservation>,
}

#[derive(Debug, Deserialize)]
pub struct SeedRestaurant {
    pub id: Option<Ulid>,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub cuisine_type: String,
    #[serde(default)]
    pub capacity: u32,
    #[serde(default)]
    pub spaces: Vec<SeedSpace>,
}

#[derive(Debug, Deserialize)]
pub struct SeedSpace {
    pub id: Option<Uuid>,
    pub name: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    /// `HH:MM`
    pub operating_start: Option<String>,
    pub operating_end: Option<String>,
    pub slot_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SeedReservation {
    pub restaurant_id: Ulid,
    pub space_id: Uuid,
    pub customer_email: String,
    /// `dd-MM-yyyy HH:mm` or ISO-8601.
    pub start_time: String,
    pub end_time: String,
    pub party_size: u32,
    pub status: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub restaurants: usize,
    pub reservations: usize,
    pub rejected: usize,
}

#[derive(Debug)]
pub enum SeedError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Invalid(String),
    Engine(EngineError),
}

impl std::fmt::Display for SeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedError::Io(e) => write!(f, "cannot read seed file: {e}"),
            SeedError::Json(e) => write!(f, "malformed seed file: {e}"),
            SeedError::Invalid(msg) => write!(f, "invalid seed data: {msg}"),
            SeedError::Engine(e) => write!(f, "seed rejected: {e}"),
        }
    }
}

impl std::error::Error for SeedError {}

fn time_field(raw: Option<&str>, what: &str) -> Result<Option<chrono::NaiveTime>, SeedError> {
    raw.map(|s| {
        parse_time_of_day(s).ok_or_else(|| SeedError::Invalid(format!("bad {what} {s:?}")))
    })
    .transpose()
}

fn date_time_field(raw: &str, what: &str) -> Result<chrono::NaiveDateTime, SeedError> {
    parse_date_time(raw).ok_or_else(|| SeedError::Invalid(format!("bad {what} {raw:?}")))
}

impl SeedSpace {
    fn into_draft(self) -> Result<(Option<Uuid>, SpaceDraft), SeedError> {
        let draft = SpaceDraft {
            operating_start: time_field(self.operating_start.as_deref(), "operating_start")?,
            operating_end: time_field(self.operating_end.as_deref(), "operating_end")?,
            slot_minutes: self.slot_minutes,
            ..SpaceDraft::new(self.name, self.min_capacity, self.max_capacity)
        };
        Ok((self.id, draft))
    }
}

impl SeedReservation {
    fn into_draft(self) -> Result<ReservationDraft, SeedError> {
        Ok(ReservationDraft {
            restaurant_id: self.restaurant_id,
            space_id: self.space_id,
            start: date_time_field(&self.start_time, "start_time")?,
            end: date_time_field(&self.end_time, "end_time")?,
            customer_email: self.customer_email,
            party_size: self.party_size,
            status: self.status,
        })
    }
}

pub fn read_seed(path: &Path) -> Result<SeedFile, SeedError> {
    let raw = std::fs::read_to_string(path).map_err(SeedError::Io)?;
    serde_json::from_str(&raw).map_err(SeedError::Json)
}

/// Load `seed` unless the engine already holds data. Malformed restaurants abort
/// the load; reservations refused by admission are logged and skipped.
pub async fn load_seed(engine: &Engine, seed: SeedFile) -> Result<SeedSummary, SeedError> {
    let mut summary = SeedSummary::default();
    if !engine.restaurants.is_empty() {
        tracing::info!("store not empty, skipping seed data");
        return Ok(summary);
    }

    for restaurant in seed.restaurants {
        let mut space_ids = Vec::with_capacity(restaurant.spaces.len());
        let mut drafts = Vec::with_capacity(restaurant.spaces.len());
        for space in restaurant.spaces {
            let (id, draft) = space.into_draft()?;
            space_ids.push(id.unwrap_or_else(Uuid::new_v4));
            drafts.push(draft);
        }
        let draft = RestaurantDraft {
            name: restaurant.name,
            address: restaurant.address,
            cuisine_type: restaurant.cuisine_type,
            capacity: restaurant.capacity,
            spaces: Some(drafts),
        };
        engine
            .create_restaurant_with_id(restaurant.id.unwrap_or_else(Ulid::new), draft, Some(space_ids))
            .await
            .map_err(SeedError::Engine)?;
        summary.restaurants += 1;
    }

    for reservation in seed.reservations {
        let draft = reservation.into_draft()?;
        match engine.create_reservation(draft).await {
            Ok(_) => summary.reservations += 1,
            Err(e) => {
                tracing::warn!("seed reservation skipped: {e}");
                summary.rejected += 1;
            }
        }
    }

    tracing::info!(
        restaurants = summary.restaurants,
        reservations = summary.reservations,
        rejected = summary.rejected,
        "seed data loaded"
    );
    Ok(summary)
}
