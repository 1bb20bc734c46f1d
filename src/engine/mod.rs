mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::ConflictPolicy;
pub use error::EngineError;

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoom = Arc<RwLock<RoomState>>;
pub type SharedCar = Arc<RwLock<CarState>>;

/// A room plus its slice of the reservation ledger. One write lock per room
/// is the critical section for check-then-book.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub reservations: Vec<RoomReservation>,
}

/// A car plus its slice of the reservation ledger.
#[derive(Debug, Clone)]
pub struct CarState {
    pub car: Car,
    pub reservations: Vec<CarReservation>,
}

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Id allocation ────────────────────────────────────────

/// Sequential ids per entity kind. Replay bumps each counter past the
/// highest id seen, so restarts never reuse an id.
struct IdGen {
    user: AtomicU32,
    room: AtomicU32,
    car: AtomicU32,
    room_reservation: AtomicU32,
    car_reservation: AtomicU32,
}

impl IdGen {
    fn new() -> Self {
        Self {
            user: AtomicU32::new(1),
            room: AtomicU32::new(1),
            car: AtomicU32::new(1),
            room_reservation: AtomicU32::new(1),
            car_reservation: AtomicU32::new(1),
        }
    }

    fn next(counter: &AtomicU32) -> Id {
        counter.fetch_add(1, Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU32, seen: Id) {
        counter.fetch_max(seen + 1, Ordering::Relaxed);
    }
}

// ── Event application ────────────────────────────────────

/// Apply an event to a RoomState (no locking — caller holds the lock).
/// `today` gates the availability flip: the flag caches current-day
/// occupancy, so only same-day bookings flip it.
fn apply_to_room(rs: &mut RoomState, event: &Event, today: NaiveDate) {
    if let Event::RoomBooked { reservation } = event {
        if reservation.date == today {
            rs.room.is_available = false;
        }
        rs.reservations.push(reservation.clone());
    }
}

/// Apply an event to a CarState (no locking — caller holds the lock).
fn apply_to_car(cs: &mut CarState, event: &Event, today: NaiveDate, index: &DashMap<Id, Id>) {
    match event {
        Event::CarBooked { reservation } => {
            if reservation.date == today && reservation.is_active() {
                cs.car.is_available = false;
            }
            index.insert(reservation.id, reservation.car_id);
            cs.reservations.push(reservation.clone());
        }
        Event::CarReturned {
            reservation_id,
            return_time,
            end_time,
            fuel_level,
            odometer,
            notes,
            ..
        } => {
            if let Some(r) = cs.reservations.iter_mut().find(|r| r.id == *reservation_id) {
                r.returned = true;
                r.return_time = Some(*return_time);
                r.end_time = Some(*end_time);
                r.fuel_level_return = *fuel_level;
                r.final_odometer = *odometer;
                r.notes = Some(notes.clone());
            }
            // The one place fuel/odometer become durable attributes of the car.
            cs.car.is_available = true;
            if let Some(fuel) = fuel_level {
                cs.car.fuel_level = *fuel;
            }
            if let Some(odo) = odometer {
                cs.car.odometer = *odo;
            }
        }
        _ => {}
    }
}

fn apply_user_patch(user: &mut User, patch: &UserPatch) {
    if let Some(name) = &patch.name {
        user.name = name.clone();
    }
    if let Some(email) = &patch.email {
        user.email = email.clone();
    }
    if let Some(password) = &patch.password {
        user.password = password.clone();
    }
    if let Some(is_admin) = patch.is_admin {
        user.is_admin = is_admin;
    }
    if let Some(license) = &patch.driver_license {
        user.driver_license = Some(license.clone());
    }
    if let Some(expiry) = patch.license_expiry {
        user.license_expiry = Some(expiry);
    }
}

// ── Engine ───────────────────────────────────────────────

/// Registries and ledgers behind one handle. Rooms and cars each carry their
/// own write lock; the user table has a single lock that serializes the
/// email-uniqueness check and the no-orphan delete guard.
///
/// Lock order is user table first, then a single resource — every code path
/// follows it.
pub struct Engine {
    pub(crate) rooms: DashMap<Id, SharedRoom>,
    pub(crate) cars: DashMap<Id, SharedCar>,
    pub(crate) users: RwLock<BTreeMap<Id, User>>,
    /// Reverse lookup: car reservation id → car id.
    pub(crate) reservation_to_car: DashMap<Id, Id>,
    ids: IdGen,
    policy: ConflictPolicy,
    compact_threshold: u64,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Availability flags come out of replay relative to the startup day, so
    /// a restart on a later calendar day heals stale flags.
    pub fn open(
        wal_path: PathBuf,
        policy: ConflictPolicy,
        compact_threshold: u64,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            cars: DashMap::new(),
            users: RwLock::new(BTreeMap::new()),
            reservation_to_car: DashMap::new(),
            ids: IdGen::new(),
            policy,
            compact_threshold,
            wal_tx,
        };

        // Replay — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention).
        let today = conflict::today();
        let mut users = engine
            .users
            .try_write()
            .expect("replay: uncontended write");
        for event in &events {
            match event {
                Event::UserAdded { user } => {
                    IdGen::bump(&engine.ids.user, user.id);
                    users.insert(user.id, user.clone());
                }
                Event::UserUpdated { id, patch } => {
                    if let Some(user) = users.get_mut(id) {
                        apply_user_patch(user, patch);
                    }
                }
                Event::UserRemoved { id } => {
                    users.remove(id);
                }
                Event::RoomAdded { room } => {
                    IdGen::bump(&engine.ids.room, room.id);
                    // The availability flag is derived state: reset it here
                    // and let the booked events below re-establish it for
                    // the replay day.
                    let mut room = room.clone();
                    room.is_available = true;
                    let rs = RoomState {
                        room,
                        reservations: Vec::new(),
                    };
                    engine.rooms.insert(rs.room.id, Arc::new(RwLock::new(rs)));
                }
                Event::CarAdded { car } => {
                    IdGen::bump(&engine.ids.car, car.id);
                    let mut car = car.clone();
                    car.is_available = true;
                    let cs = CarState {
                        car,
                        reservations: Vec::new(),
                    };
                    engine.cars.insert(cs.car.id, Arc::new(RwLock::new(cs)));
                }
                Event::RoomBooked { reservation } => {
                    IdGen::bump(&engine.ids.room_reservation, reservation.id);
                    if let Some(entry) = engine.rooms.get(&reservation.room_id) {
                        let rs = entry.value().clone();
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        apply_to_room(&mut guard, event, today);
                    }
                }
                Event::CarBooked { reservation } => {
                    IdGen::bump(&engine.ids.car_reservation, reservation.id);
                    if let Some(entry) = engine.cars.get(&reservation.car_id) {
                        let cs = entry.value().clone();
                        let mut guard = cs.try_write().expect("replay: uncontended write");
                        apply_to_car(&mut guard, event, today, &engine.reservation_to_car);
                    }
                }
                Event::CarReturned { car_id, .. } => {
                    if let Some(entry) = engine.cars.get(car_id) {
                        let cs = entry.value().clone();
                        let mut guard = cs.try_write().expect("replay: uncontended write");
                        apply_to_car(&mut guard, event, today, &engine.reservation_to_car);
                    }
                }
            }
        }
        drop(users);

        Ok(engine)
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn get_room(&self, id: &Id) -> Option<SharedRoom> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_car(&self, id: &Id) -> Option<SharedCar> {
        self.cars.get(id).map(|e| e.value().clone())
    }

    pub fn car_for_reservation(&self, reservation_id: &Id) -> Option<Id> {
        self.reservation_to_car.get(reservation_id).map(|e| *e.value())
    }

    pub(super) fn next_user_id(&self) -> Id {
        IdGen::next(&self.ids.user)
    }

    pub(super) fn next_room_id(&self) -> Id {
        IdGen::next(&self.ids.room)
    }

    pub(super) fn next_car_id(&self) -> Id {
        IdGen::next(&self.ids.car)
    }

    pub(super) fn next_room_reservation_id(&self) -> Id {
        IdGen::next(&self.ids.room_reservation)
    }

    pub(super) fn next_car_reservation_id(&self) -> Id {
        IdGen::next(&self.ids.car_reservation)
    }

    /// WAL-append + apply in one call, under the caller's room write lock.
    /// Nothing is applied when the append fails, so ledger and registry can
    /// never diverge.
    pub(super) async fn persist_and_apply_room(
        &self,
        rs: &mut RoomState,
        event: &Event,
        today: NaiveDate,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, today);
        Ok(())
    }

    /// WAL-append + apply in one call, under the caller's car write lock.
    pub(super) async fn persist_and_apply_car(
        &self,
        cs: &mut CarState,
        event: &Event,
        today: NaiveDate,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_car(cs, event, today, &self.reservation_to_car);
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Quiesces all writers (user table first,
    /// then every resource in id order — the global lock order) so the
    /// snapshot and the swap see the same state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let users = self.users.write().await;

        let mut room_ids: Vec<Id> = self.rooms.iter().map(|e| *e.key()).collect();
        room_ids.sort_unstable();
        let mut room_guards = Vec::with_capacity(room_ids.len());
        for id in &room_ids {
            if let Some(rs) = self.get_room(id) {
                room_guards.push(rs.write_owned().await);
            }
        }

        let mut car_ids: Vec<Id> = self.cars.iter().map(|e| *e.key()).collect();
        car_ids.sort_unstable();
        let mut car_guards = Vec::with_capacity(car_ids.len());
        for id in &car_ids {
            if let Some(cs) = self.get_car(id) {
                car_guards.push(cs.write_owned().await);
            }
        }

        let mut events = Vec::new();
        for user in users.values() {
            events.push(Event::UserAdded { user: user.clone() });
        }
        for guard in &room_guards {
            events.push(Event::RoomAdded {
                room: guard.room.clone(),
            });
            for r in &guard.reservations {
                events.push(Event::RoomBooked {
                    reservation: r.clone(),
                });
            }
        }
        for guard in &car_guards {
            events.push(Event::CarAdded {
                car: guard.car.clone(),
            });
            // Reservations carry their full current state (including the
            // returned fields), so no CarReturned events are re-emitted.
            for r in &guard.reservations {
                events.push(Event::CarBooked {
                    reservation: r.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
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

    /// Compact once the append count passes the configured threshold.
    /// Called at the end of mutations, after all guards are dropped.
    pub(super) async fn maybe_compact(&self) {
        if self.compact_threshold == 0 {
            return;
        }
        if self.wal_appends_since_compact().await >= self.compact_threshold
            && let Err(e) = self.compact_wal().await
        {
            tracing::warn!("WAL compaction failed: {e}");
        }
    }
}
