mod admission;
mod analytics;
mod cache;
mod capacity;
mod error;
mod mutations;
mod queries;
mod slots;

pub use admission::{admit, validate_draft, validate_email, Admitted};
pub use analytics::{
    build_report, round2, OccupancyReport, OccupancySummary, ReportQuery, SpaceOccupancyReport,
    TimeSlotOccupancy, DEFAULT_PAGE, DEFAULT_PAGE_SIZE,
};
pub use cache::ReportCache;
pub use capacity::{available_capacity, calculate_occupancy, validate, validate_excluding};
pub use error::{DateRangeProblem, EngineError, ErrorCategory};
pub use slots::{align_end, align_start};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::config::Settings;
use crate::model::*;
use crate::wal::Wal;

pub type SharedRestaurant = Arc<RwLock<Restaurant>>;
pub type SharedLedger = Arc<RwLock<SpaceLedger>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Takes one append, drains whatever else is already queued,
/// and commits the whole batch with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} event(s): {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak into the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

pub struct Engine {
    pub restaurants: DashMap<Ulid, SharedRestaurant>,
    /// One ledger per (restaurant, space).
    pub(super) ledgers: DashMap<SpaceKey, SharedLedger>,
    /// Reverse lookup: reservation id → owning space.
    pub(super) reservation_index: DashMap<Ulid, SpaceKey>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) reports: ReportCache,
    /// Mutations hold this shared; compaction holds it exclusively so its
    /// snapshot cannot miss an in-flight append.
    pub(super) write_gate: RwLock<()>,
    pub settings: Arc<Settings>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, settings: Arc<Settings>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let analytics = &settings.analytics;
        let engine = Self {
            restaurants: DashMap::new(),
            ledgers: DashMap::new(),
            reservation_index: DashMap::new(),
            wal_tx,
            reports: ReportCache::new(analytics.cache_ttl, analytics.cache_max_entries),
            write_gate: RwLock::new(()),
            settings,
        };

        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            events = events.len(),
            restaurants = engine.restaurants.len(),
            reservations = engine.reservation_index.len(),
            "replayed WAL {}",
            wal_path.display()
        );
        Ok(engine)
    }

    /// Apply one WAL event during startup. We are the only owner of every Arc
    /// here, so `try_write` cannot fail; a miss means the log references
    /// something it never created and the event is skipped.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::RestaurantCreated { restaurant } => {
                self.install_restaurant(restaurant.clone());
            }
            Event::RestaurantReplaced { restaurant } => {
                let Some(shared) = self.get_restaurant_state(&restaurant.id) else {
                    tracing::warn!(id = %restaurant.id, "replay: replace of unknown restaurant");
                    return;
                };
                let Ok(mut guard) = shared.try_write() else { return };
                self.sync_ledgers(&guard, restaurant);
                *guard = restaurant.clone();
            }
            Event::RestaurantDeleted { id } => {
                self.uninstall_restaurant(id);
            }
            Event::SpaceAdded { restaurant_id, space } => {
                let Some(shared) = self.get_restaurant_state(restaurant_id) else { return };
                let Ok(mut guard) = shared.try_write() else { return };
                guard.spaces.push(space.clone());
                self.ledgers.insert((*restaurant_id, space.id), Arc::default());
            }
            Event::SpaceRemoved { restaurant_id, space_id } => {
                let Some(shared) = self.get_restaurant_state(restaurant_id) else { return };
                let Ok(mut guard) = shared.try_write() else { return };
                guard.spaces.retain(|s| s.id != *space_id);
                self.ledgers.remove(&(*restaurant_id, *space_id));
            }
            Event::ReservationCreated { reservation } => {
                let key = reservation.key();
                let Some(ledger) = self.get_ledger(&key) else {
                    tracing::warn!(id = %reservation.id, "replay: reservation for unknown space");
                    return;
                };
                let Ok(mut guard) = ledger.try_write() else { return };
                guard.insert(reservation.clone());
                self.reservation_index.insert(reservation.id, key);
            }
            Event::ReservationDeleted { id, restaurant_id, space_id } => {
                if let Some(ledger) = self.get_ledger(&(*restaurant_id, *space_id))
                    && let Ok(mut guard) = ledger.try_write()
                {
                    guard.remove(*id);
                }
                self.reservation_index.remove(id);
            }
        }
    }

    /// Register a restaurant and an empty ledger per space.
    pub(super) fn install_restaurant(&self, restaurant: Restaurant) {
        for key in restaurant.space_keys() {
            self.ledgers.insert(key, Arc::default());
        }
        self.restaurants
            .insert(restaurant.id, Arc::new(RwLock::new(restaurant)));
    }

    pub(super) fn uninstall_restaurant(&self, id: &Ulid) {
        self.restaurants.remove(id);
        self.ledgers.retain(|(rid, _), _| rid != id);
    }

    /// Make the ledger set match `next`'s spaces. Caller holds the restaurant write lock.
    pub(super) fn sync_ledgers(&self, current: &Restaurant, next: &Restaurant) {
        for space in &current.spaces {
            if !next.has_space(&space.id) {
                self.ledgers.remove(&(current.id, space.id));
            }
        }
        for key in next.space_keys() {
            self.ledgers.entry(key).or_default();
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_restaurant_state(&self, id: &Ulid) -> Option<SharedRestaurant> {
        self.restaurants.get(id).map(|e| e.value().clone())
    }

    pub(super) fn get_ledger(&self, key: &SpaceKey) -> Option<SharedLedger> {
        self.ledgers.get(key).map(|e| e.value().clone())
    }

    pub(super) fn restaurant_or_not_found(&self, id: &Ulid) -> Result<SharedRestaurant, EngineError> {
        self.get_restaurant_state(id)
            .ok_or(EngineError::RestaurantNotFound(*id))
    }
}
