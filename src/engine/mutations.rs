use std::sync::Arc;

use tokio::sync::oneshot;
use ulid::Ulid;
use uuid::Uuid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::admission::{admit, validate_draft};
use super::capacity;
use super::{Engine, EngineError, WalCommand};

fn check_text(field: &str, value: &str, max: usize, required: bool) -> Result<(), EngineError> {
    if required && value.trim().is_empty() {
        return Err(EngineError::InvalidInput(format!("{field} must not be blank")));
    }
    if value.len() > max {
        return Err(EngineError::InvalidInput(format!("{field} must be at most {max} characters")));
    }
    Ok(())
}

pub(crate) fn validate_space_draft(draft: &SpaceDraft) -> Result<(), EngineError> {
    check_text("space name", &draft.name, MAX_NAME_LEN, true)?;
    if draft.min_capacity == 0 || draft.max_capacity == 0 {
        return Err(EngineError::InvalidInput("space capacities must be positive".into()));
    }
    if let Some(slot) = draft.slot_minutes
        && (slot == 0 || slot > MAX_SLOT_MINUTES)
    {
        return Err(EngineError::InvalidInput(format!(
            "slot duration must be between 1 and {MAX_SLOT_MINUTES} minutes"
        )));
    }
    if let (Some(open), Some(close)) = (draft.operating_start, draft.operating_end)
        && open >= close
    {
        return Err(EngineError::InvalidInput(format!(
            "operating start {open} must be before operating end {close}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_restaurant_draft(draft: &RestaurantDraft) -> Result<(), EngineError> {
    check_text("restaurant name", &draft.name, MAX_NAME_LEN, true)?;
    check_text("address", &draft.address, MAX_ADDRESS_LEN, false)?;
    check_text("cuisine type", &draft.cuisine_type, MAX_CUISINE_LEN, false)?;
    if let Some(spaces) = &draft.spaces {
        if spaces.len() > MAX_SPACES_PER_RESTAURANT {
            return Err(EngineError::LimitExceeded("too many spaces in restaurant"));
        }
        spaces.iter().try_for_each(validate_space_draft)?;
    }
    Ok(())
}

impl Engine {
    pub async fn create_restaurant(&self, draft: RestaurantDraft) -> Result<Restaurant, EngineError> {
        self.create_restaurant_with_id(Ulid::new(), draft, None).await
    }

    /// Create under a caller-chosen id. `space_ids`, when given, must line up
    /// with `draft.spaces`; used by the seed loader so fixtures can point at spaces.
    pub async fn create_restaurant_with_id(
        &self,
        id: Ulid,
        draft: RestaurantDraft,
        space_ids: Option<Vec<Uuid>>,
    ) -> Result<Restaurant, EngineError> {
        validate_restaurant_draft(&draft)?;
        let _gate = self.write_gate.read().await;
        if self.restaurants.len() >= MAX_RESTAURANTS {
            return Err(EngineError::LimitExceeded("too many restaurants"));
        }
        if self.restaurants.contains_key(&id) {
            return Err(EngineError::InvalidInput(format!("restaurant {id} already exists")));
        }

        let drafts = draft.spaces.unwrap_or_default();
        let spaces = match space_ids {
            Some(ids) if ids.len() == drafts.len() => ids
                .into_iter()
                .zip(drafts)
                .map(|(sid, d)| Space::with_id(sid, d))
                .collect(),
            Some(_) => {
                return Err(EngineError::InvalidInput("space ids do not match spaces".into()));
            }
            None => drafts.into_iter().map(Space::from_draft).collect(),
        };
        let restaurant = Restaurant {
            id,
            name: draft.name,
            address: draft.address,
            cuisine_type: draft.cuisine_type,
            capacity: draft.capacity,
            spaces,
        };

        self.wal_append(&Event::RestaurantCreated { restaurant: restaurant.clone() })
            .await?;
        self.install_restaurant(restaurant.clone());
        tracing::info!(id = %restaurant.id, name = %restaurant.name, spaces = restaurant.spaces.len(), "restaurant created");
        Ok(restaurant)
    }

    /// Whole-document replacement. `draft.spaces == None` keeps the current
    /// spaces; otherwise the space list is rebuilt under fresh ids.
    pub async fn replace_restaurant(
        &self,
        id: Ulid,
        draft: RestaurantDraft,
    ) -> Result<Option<Restaurant>, EngineError> {
        validate_restaurant_draft(&draft)?;
        let _gate = self.write_gate.read().await;
        let Some(shared) = self.get_restaurant_state(&id) else {
            return Ok(None);
        };
        let mut guard = shared.write().await;

        let spaces = match draft.spaces {
            None => guard.spaces.clone(),
            Some(drafts) => {
                for space in &guard.spaces {
                    self.ensure_space_unreferenced(id, space.id).await?;
                }
                drafts.into_iter().map(Space::from_draft).collect()
            }
        };
        let next = Restaurant {
            id,
            name: draft.name,
            address: draft.address,
            cuisine_type: draft.cuisine_type,
            capacity: draft.capacity,
            spaces,
        };

        self.wal_append(&Event::RestaurantReplaced { restaurant: next.clone() })
            .await?;
        self.sync_ledgers(&guard, &next);
        *guard = next.clone();
        drop(guard);

        self.reports.invalidate_restaurant(id).await;
        tracing::info!(%id, "restaurant replaced");
        Ok(Some(next))
    }

    /// `Ok(false)` when there was nothing to delete.
    pub async fn delete_restaurant(&self, id: Ulid) -> Result<bool, EngineError> {
        let _gate = self.write_gate.read().await;
        let Some(shared) = self.get_restaurant_state(&id) else {
            return Ok(false);
        };
        let guard = shared.write().await;
        if !self.restaurants.contains_key(&id) {
            return Ok(false);
        }

        let mut referenced = 0;
        for key in guard.space_keys() {
            if let Some(ledger) = self.get_ledger(&key) {
                referenced += ledger.read().await.len();
            }
        }
        if referenced > 0 {
            return Err(EngineError::RestaurantInUse {
                restaurant_id: id,
                reservations: referenced,
            });
        }

        self.wal_append(&Event::RestaurantDeleted { id }).await?;
        self.uninstall_restaurant(&id);
        drop(guard);

        self.reports.forget_restaurant(id).await;
        tracing::info!(%id, "restaurant deleted");
        Ok(true)
    }

    /// `Ok(None)` when the restaurant does not exist.
    pub async fn add_space(
        &self,
        restaurant_id: Ulid,
        draft: SpaceDraft,
    ) -> Result<Option<(Restaurant, Space)>, EngineError> {
        validate_space_draft(&draft)?;
        let _gate = self.write_gate.read().await;
        let Some(shared) = self.get_restaurant_state(&restaurant_id) else {
            return Ok(None);
        };
        let mut guard = shared.write().await;
        if guard.spaces.len() >= MAX_SPACES_PER_RESTAURANT {
            return Err(EngineError::LimitExceeded("too many spaces in restaurant"));
        }

        let space = Space::from_draft(draft);
        self.wal_append(&Event::SpaceAdded {
            restaurant_id,
            space: space.clone(),
        })
        .await?;
        guard.spaces.push(space.clone());
        self.ledgers.insert((restaurant_id, space.id), Arc::default());
        let restaurant = guard.clone();
        drop(guard);

        self.reports.invalidate_restaurant(restaurant_id).await;
        tracing::info!(%restaurant_id, space_id = %space.id, "space added");
        Ok(Some((restaurant, space)))
    }

    /// `Ok(None)` when the restaurant or the space does not exist.
    pub async fn remove_space(
        &self,
        restaurant_id: Ulid,
        space_id: Uuid,
    ) -> Result<Option<Restaurant>, EngineError> {
        let _gate = self.write_gate.read().await;
        let Some(shared) = self.get_restaurant_state(&restaurant_id) else {
            return Ok(None);
        };
        let mut guard = shared.write().await;
        if !guard.has_space(&space_id) {
            return Ok(None);
        }
        self.ensure_space_unreferenced(restaurant_id, space_id).await?;

        self.wal_append(&Event::SpaceRemoved { restaurant_id, space_id })
            .await?;
        guard.spaces.retain(|s| s.id != space_id);
        self.ledgers.remove(&(restaurant_id, space_id));
        let restaurant = guard.clone();
        drop(guard);

        self.reports.invalidate_restaurant(restaurant_id).await;
        tracing::info!(%restaurant_id, %space_id, "space removed");
        Ok(Some(restaurant))
    }

    /// Caller holds the restaurant write lock, so no admission can race the check.
    async fn ensure_space_unreferenced(&self, restaurant_id: Ulid, space_id: Uuid) -> Result<(), EngineError> {
        let Some(ledger) = self.get_ledger(&(restaurant_id, space_id)) else {
            return Ok(());
        };
        let reservations = ledger.read().await.len();
        if reservations > 0 {
            return Err(EngineError::SpaceInUse { space_id, reservations });
        }
        Ok(())
    }

    /// Admit, capacity-check and persist a reservation. The space's ledger
    /// stays write-locked from the occupancy read until the insert.
    pub async fn create_reservation(&self, draft: ReservationDraft) -> Result<Reservation, EngineError> {
        let restaurant_id = draft.restaurant_id;
        let result = self.admit_and_store(draft).await;
        match &result {
            Ok(reservation) => {
                self.reports.invalidate_restaurant(restaurant_id).await;
                metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
                tracing::info!(
                    id = %reservation.id,
                    %restaurant_id,
                    space_id = %reservation.space_id,
                    party = reservation.party_size,
                    "reservation created {} - {}",
                    format_date_time(reservation.span.start),
                    format_date_time(reservation.span.end)
                );
            }
            Err(e) => {
                metrics::counter!(observability::RESERVATIONS_REJECTED_TOTAL, "reason" => e.reason())
                    .increment(1);
                tracing::debug!(%restaurant_id, "reservation rejected: {e}");
            }
        }
        result
    }

    async fn admit_and_store(&self, draft: ReservationDraft) -> Result<Reservation, EngineError> {
        validate_draft(&draft)?;
        let _gate = self.write_gate.read().await;
        let shared = self.restaurant_or_not_found(&draft.restaurant_id)?;
        let restaurant = shared.read().await;
        let admitted = admit(&restaurant, &draft, &self.settings.space_defaults)?;

        let key = (restaurant.id, admitted.space.id);
        // Gone if the restaurant was deleted while we waited for its lock.
        let ledger = self
            .get_ledger(&key)
            .ok_or(EngineError::RestaurantNotFound(restaurant.id))?;
        let mut ledger = ledger.write().await;
        if ledger.len() >= MAX_RESERVATIONS_PER_SPACE {
            return Err(EngineError::LimitExceeded("too many reservations for space"));
        }

        let reservation = Reservation {
            id: Ulid::new(),
            restaurant_id: restaurant.id,
            space_id: admitted.space.id,
            customer_email: draft.customer_email,
            span: admitted.span,
            party_size: draft.party_size,
            status: draft.status.unwrap_or_else(|| DEFAULT_STATUS.to_string()),
        };
        capacity::validate(&ledger, &reservation, &admitted.space)?;

        self.wal_append(&Event::ReservationCreated { reservation: reservation.clone() })
            .await?;
        ledger.insert(reservation.clone());
        self.reservation_index.insert(reservation.id, key);
        Ok(reservation)
    }

    /// `Ok(false)` when the id is unknown; deleting twice is harmless.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<bool, EngineError> {
        let _gate = self.write_gate.read().await;
        let Some(key) = self.reservation_index.get(&id).map(|e| *e.value()) else {
            return Ok(false);
        };
        let Some(ledger) = self.get_ledger(&key) else {
            return Ok(false);
        };
        let mut ledger = ledger.write().await;
        if !ledger.reservations.iter().any(|r| r.id == id) {
            return Ok(false);
        }

        let (restaurant_id, space_id) = key;
        self.wal_append(&Event::ReservationDeleted { id, restaurant_id, space_id })
            .await?;
        ledger.remove(id);
        self.reservation_index.remove(&id);
        drop(ledger);
        drop(_gate);

        self.reports.invalidate_restaurant(restaurant_id).await;
        metrics::counter!(observability::RESERVATIONS_DELETED_TOTAL).increment(1);
        tracing::info!(%id, %restaurant_id, %space_id, "reservation deleted");
        Ok(true)
    }

    /// Rewrite the WAL as the minimal event list that rebuilds current state.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _gate = self.write_gate.write().await;

        let mut ids: Vec<Ulid> = self.restaurants.iter().map(|e| *e.key()).collect();
        ids.sort();

        let mut events = Vec::new();
        let mut reservations = Vec::new();
        for id in ids {
            let Some(shared) = self.get_restaurant_state(&id) else { continue };
            let restaurant = shared.read().await.clone();
            for key in restaurant.space_keys() {
                if let Some(ledger) = self.get_ledger(&key) {
                    reservations.extend(ledger.read().await.reservations.iter().cloned());
                }
            }
            events.push(Event::RestaurantCreated { restaurant });
        }
        events.extend(
            reservations
                .into_iter()
                .map(|reservation| Event::ReservationCreated { reservation }),
        );
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
