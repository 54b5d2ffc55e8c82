use std::sync::Arc;

use chrono::NaiveDateTime;
use ulid::Ulid;
use uuid::Uuid;

use crate::config::Schedule;
use crate::model::*;

use super::analytics::{build_report, validate_pagination, validate_range, OccupancyReport, ReportQuery};
use super::capacity;
use super::{Engine, EngineError};

fn by_start(a: &Reservation, b: &Reservation) -> std::cmp::Ordering {
    a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id))
}

impl Engine {
    pub async fn get_restaurant(&self, id: &Ulid) -> Option<Restaurant> {
        let shared = self.get_restaurant_state(id)?;
        let guard = shared.read().await;
        Some(guard.clone())
    }

    /// All restaurants, oldest id first.
    pub async fn list_restaurants(&self) -> Vec<Restaurant> {
        let shared: Vec<_> = self.restaurants.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for rs in shared {
            out.push(rs.read().await.clone());
        }
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn get_space(&self, restaurant_id: &Ulid, space_id: &Uuid) -> Option<Space> {
        let shared = self.get_restaurant_state(restaurant_id)?;
        let guard = shared.read().await;
        guard.space(space_id).cloned()
    }

    pub async fn space_exists(&self, restaurant_id: &Ulid, space_id: &Uuid) -> bool {
        self.get_space(restaurant_id, space_id).await.is_some()
    }

    /// Hours and slot length in force for `space`, after defaults.
    pub fn effective_schedule(&self, space: &Space) -> Schedule {
        self.settings.space_defaults.resolve(space)
    }

    pub async fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        let key = *self.reservation_index.get(id)?.value();
        let ledger = self.get_ledger(&key)?;
        let guard = ledger.read().await;
        guard.reservations.iter().find(|r| r.id == *id).cloned()
    }

    /// Like `get_reservation`, for callers that treat absence as an error.
    pub async fn require_reservation(&self, id: &Ulid) -> Result<Reservation, EngineError> {
        self.get_reservation(id)
            .await
            .ok_or(EngineError::ReservationNotFound(*id))
    }

    pub async fn list_reservations(&self) -> Vec<Reservation> {
        let ledgers: Vec<_> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for ledger in ledgers {
            out.extend(ledger.read().await.reservations.iter().cloned());
        }
        out.sort_by(by_start);
        out
    }

    pub async fn reservations_for_restaurant(&self, restaurant_id: &Ulid) -> Vec<Reservation> {
        let ledgers: Vec<_> = self
            .ledgers
            .iter()
            .filter(|e| e.key().0 == *restaurant_id)
            .map(|e| e.value().clone())
            .collect();
        let mut out = Vec::new();
        for ledger in ledgers {
            out.extend(ledger.read().await.reservations.iter().cloned());
        }
        out.sort_by(by_start);
        out
    }

    pub async fn reservations_for_space(&self, restaurant_id: &Ulid, space_id: &Uuid) -> Vec<Reservation> {
        match self.get_ledger(&(*restaurant_id, *space_id)) {
            Some(ledger) => ledger.read().await.reservations.clone(),
            None => Vec::new(),
        }
    }

    /// Reservations of one space overlapping `span`, in start order.
    pub async fn reservations_overlapping(&self, restaurant_id: &Ulid, space_id: &Uuid, span: &Span) -> Vec<Reservation> {
        match self.get_ledger(&(*restaurant_id, *space_id)) {
            Some(ledger) => ledger.read().await.overlapping(span).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Resolve a (restaurant, space, window) triple for the occupancy queries.
    async fn space_window(
        &self,
        restaurant_id: &Ulid,
        space_id: &Uuid,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<(Space, Span), EngineError> {
        if end <= start {
            return Err(EngineError::InvalidInput("end time must be after start time".into()));
        }
        let shared = self.restaurant_or_not_found(restaurant_id)?;
        let guard = shared.read().await;
        let space = guard.space(space_id).cloned().ok_or(EngineError::SpaceNotFound {
            restaurant_id: *restaurant_id,
            space_id: *space_id,
        })?;
        Ok((space, Span::new(start, end)))
    }

    pub async fn calculate_occupancy(
        &self,
        restaurant_id: &Ulid,
        space_id: &Uuid,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<u32, EngineError> {
        let (_, span) = self.space_window(restaurant_id, space_id, start, end).await?;
        Ok(match self.get_ledger(&(*restaurant_id, *space_id)) {
            Some(ledger) => capacity::calculate_occupancy(&*ledger.read().await, &span),
            None => 0,
        })
    }

    pub async fn available_capacity(
        &self,
        restaurant_id: &Ulid,
        space_id: &Uuid,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<u32, EngineError> {
        let (space, span) = self.space_window(restaurant_id, space_id, start, end).await?;
        Ok(match self.get_ledger(&(*restaurant_id, *space_id)) {
            Some(ledger) => capacity::available_capacity(&*ledger.read().await, &span, &space),
            None => space.max_capacity,
        })
    }

    /// Occupancy report, served from cache when an identical query was
    /// answered since the restaurant's last write.
    pub async fn occupancy_report(&self, query: &ReportQuery) -> Result<Arc<OccupancyReport>, EngineError> {
        let analytics = &self.settings.analytics;
        let window = validate_range(query.start, query.end, analytics.max_range_days)?;
        validate_pagination(query.page, query.size)?;

        if let Some(hit) = self.reports.get(query).await {
            return Ok(hit);
        }
        let generation = self.reports.generation(&query.restaurant_id);

        let shared = self.restaurant_or_not_found(&query.restaurant_id)?;
        let restaurant = shared.read().await;
        let spaces: Vec<Space> = match query.space_id {
            Some(space_id) => vec![restaurant.space(&space_id).cloned().ok_or(EngineError::SpaceNotFound {
                restaurant_id: restaurant.id,
                space_id,
            })?],
            None => restaurant.spaces.clone(),
        };

        let mut scope = Vec::with_capacity(spaces.len());
        for space in spaces {
            let reservations = self
                .reservations_overlapping(&restaurant.id, &space.id, &window)
                .await;
            scope.push((space, reservations));
        }
        drop(restaurant);

        tracing::debug!(
            restaurant_id = %query.restaurant_id,
            spaces = scope.len(),
            reservations = scope.iter().map(|(_, r)| r.len()).sum::<usize>(),
            "generating occupancy report"
        );
        let report = Arc::new(build_report(
            query.restaurant_id,
            window,
            &scope,
            analytics.slot_minutes,
            query.page,
            query.size,
        ));
        self.reports
            .insert_if_current(query.clone(), report.clone(), generation)
            .await;
        Ok(report)
    }
}
