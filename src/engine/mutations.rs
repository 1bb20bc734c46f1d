use crate::auth;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use std::sync::Arc;

use tokio::sync::RwLock;

use super::conflict::{self, check_car_free, check_room_slot, validate_slot};
use super::{CarState, Engine, EngineError, RoomState, apply_user_patch};

fn check_len(s: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if s.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_fuel(level: u8) -> Result<(), EngineError> {
    if level > 100 {
        return Err(EngineError::Validation("fuelLevel must be between 0 and 100"));
    }
    Ok(())
}

impl Engine {
    // ── User registry ────────────────────────────────────

    pub async fn login(&self, email: &str, password: &str) -> Result<UserInfo, EngineError> {
        let users = self.users.read().await;
        match auth::verify_credentials(&users, email, password) {
            Some(user) => Ok(UserInfo::from(user)),
            None => {
                metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                Err(EngineError::Unauthorized)
            }
        }
    }

    pub async fn create_user(&self, req: NewUser) -> Result<UserInfo, EngineError> {
        if req.name.is_empty() {
            return Err(EngineError::Validation("name is required"));
        }
        if req.email.is_empty() {
            return Err(EngineError::Validation("email is required"));
        }
        if req.password.is_empty() {
            return Err(EngineError::Validation("password is required"));
        }
        check_len(&req.name, MAX_NAME_LEN, "name too long")?;
        check_len(&req.email, MAX_EMAIL_LEN, "email too long")?;
        check_len(&req.password, MAX_PASSWORD_LEN, "password too long")?;
        if let Some(license) = &req.driver_license {
            check_len(license, MAX_LICENSE_LEN, "driverLicense too long")?;
        }

        let mut users = self.users.write().await;
        if users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if users.values().any(|u| u.email == req.email) {
            return Err(EngineError::EmailTaken(req.email));
        }

        let user = User {
            id: self.next_user_id(),
            name: req.name,
            email: req.email,
            password: req.password,
            is_admin: req.is_admin,
            driver_license: req.driver_license,
            license_expiry: req.license_expiry,
        };
        self.wal_append(&Event::UserAdded { user: user.clone() }).await?;
        let info = UserInfo::from(&user);
        users.insert(user.id, user);
        drop(users);

        self.maybe_compact().await;
        Ok(info)
    }

    pub async fn update_user(&self, id: Id, patch: UserPatch) -> Result<UserInfo, EngineError> {
        if let Some(name) = &patch.name {
            if name.is_empty() {
                return Err(EngineError::Validation("name must not be empty"));
            }
            check_len(name, MAX_NAME_LEN, "name too long")?;
        }
        if let Some(email) = &patch.email {
            if email.is_empty() {
                return Err(EngineError::Validation("email must not be empty"));
            }
            check_len(email, MAX_EMAIL_LEN, "email too long")?;
        }
        if let Some(password) = &patch.password {
            if password.is_empty() {
                return Err(EngineError::Validation("password must not be empty"));
            }
            check_len(password, MAX_PASSWORD_LEN, "password too long")?;
        }
        if let Some(license) = &patch.driver_license {
            check_len(license, MAX_LICENSE_LEN, "driverLicense too long")?;
        }

        let mut users = self.users.write().await;
        if !users.contains_key(&id) {
            return Err(EngineError::NotFound { what: "user", id });
        }
        if let Some(email) = &patch.email
            && users.values().any(|u| u.id != id && &u.email == email)
        {
            return Err(EngineError::EmailTaken(email.clone()));
        }

        self.wal_append(&Event::UserUpdated {
            id,
            patch: patch.clone(),
        })
        .await?;
        let user = users.get_mut(&id).expect("checked above");
        apply_user_patch(user, &patch);
        let info = UserInfo::from(&*user);
        drop(users);

        self.maybe_compact().await;
        Ok(info)
    }

    /// Delete a user, refusing while any reservation still references it.
    pub async fn delete_user(&self, id: Id) -> Result<UserInfo, EngineError> {
        let mut users = self.users.write().await;
        if !users.contains_key(&id) {
            return Err(EngineError::NotFound { what: "user", id });
        }

        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let cars: Vec<_> = self.cars.iter().map(|e| e.value().clone()).collect();
        let mut owned = 0usize;
        for rs in &rooms {
            let guard = rs.read().await;
            owned += guard.reservations.iter().filter(|r| r.user_id == id).count();
        }
        for cs in &cars {
            let guard = cs.read().await;
            owned += guard.reservations.iter().filter(|r| r.user_id == id).count();
        }
        if owned > 0 {
            return Err(EngineError::HasReservations(id));
        }

        self.wal_append(&Event::UserRemoved { id }).await?;
        let user = users.remove(&id).expect("checked above");
        drop(users);

        self.maybe_compact().await;
        Ok(UserInfo::from(&user))
    }

    // ── Resource registry provisioning ───────────────────

    pub async fn add_room(&self, name: String, capacity: String) -> Result<Room, EngineError> {
        if name.is_empty() {
            return Err(EngineError::Validation("name is required"));
        }
        check_len(&name, MAX_NAME_LEN, "name too long")?;
        check_len(&capacity, MAX_CAPACITY_LEN, "capacity too long")?;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let room = Room {
            id: self.next_room_id(),
            name,
            capacity,
            is_available: true,
        };
        self.wal_append(&Event::RoomAdded { room: room.clone() }).await?;
        let state = RoomState {
            room: room.clone(),
            reservations: Vec::new(),
        };
        self.rooms.insert(room.id, Arc::new(RwLock::new(state)));

        self.maybe_compact().await;
        Ok(room)
    }

    pub async fn add_car(
        &self,
        model: String,
        plate: String,
        fuel_level: u8,
        odometer: u32,
    ) -> Result<Car, EngineError> {
        if model.is_empty() {
            return Err(EngineError::Validation("model is required"));
        }
        if plate.is_empty() {
            return Err(EngineError::Validation("plate is required"));
        }
        check_len(&model, MAX_NAME_LEN, "model too long")?;
        check_len(&plate, MAX_PLATE_LEN, "plate too long")?;
        check_fuel(fuel_level)?;
        if self.cars.len() >= MAX_CARS {
            return Err(EngineError::LimitExceeded("too many cars"));
        }

        let cars: Vec<_> = self.cars.iter().map(|e| e.value().clone()).collect();
        for cs in &cars {
            if cs.read().await.car.plate == plate {
                return Err(EngineError::PlateTaken(plate));
            }
        }

        let car = Car {
            id: self.next_car_id(),
            model,
            plate,
            is_available: true,
            fuel_level,
            odometer,
        };
        self.wal_append(&Event::CarAdded { car: car.clone() }).await?;
        let state = CarState {
            car: car.clone(),
            reservations: Vec::new(),
        };
        self.cars.insert(car.id, Arc::new(RwLock::new(state)));

        self.maybe_compact().await;
        Ok(car)
    }

    /// First-start seed: the default accounts and fleet, written through the
    /// normal mutation paths. No-op when users already exist.
    pub async fn seed_defaults(&self) -> Result<(), EngineError> {
        if !self.users.read().await.is_empty() {
            return Ok(());
        }

        self.create_user(NewUser {
            name: "Admin User".into(),
            email: "admin@example.com".into(),
            password: "admin123".into(),
            is_admin: true,
            driver_license: None,
            license_expiry: None,
        })
        .await?;
        self.create_user(NewUser {
            name: "Regular User".into(),
            email: "user@example.com".into(),
            password: "user123".into(),
            is_admin: false,
            driver_license: None,
            license_expiry: None,
        })
        .await?;

        self.add_room("Conference Room".into(), "10 people".into()).await?;
        self.add_room("Coworking Room".into(), "8 people".into()).await?;
        self.add_room("Huddle Room".into(), "6 people".into()).await?;

        self.add_car("Fiat Uno".into(), "ABC-1234".into(), 80, 42_300).await?;
        self.add_car("VW Gol".into(), "DEF-5678".into(), 95, 18_650).await?;
        self.add_car("Toyota Corolla".into(), "GHI-9012".into(), 70, 61_020).await?;

        Ok(())
    }

    // ── Booking coordinator ──────────────────────────────

    pub async fn create_room_reservation(
        &self,
        req: NewRoomReservation,
    ) -> Result<RoomReservation, EngineError> {
        let slot = validate_slot(req.start_time, req.end_time)?;

        // Held through commit: blocks a concurrent user delete from racing
        // the owner check (lock order: user table before resource).
        let users = self.users.read().await;
        if !users.contains_key(&req.user_id) {
            return Err(EngineError::NotFound {
                what: "user",
                id: req.user_id,
            });
        }

        let room = self.get_room(&req.room_id).ok_or(EngineError::NotFound {
            what: "room",
            id: req.room_id,
        })?;
        let mut guard = room.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }

        let today = conflict::today();
        if self.policy().checks(req.date, today)
            && let Err(e) = check_room_slot(&guard.reservations, req.date, &slot)
        {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL, "resource" => "room")
                .increment(1);
            return Err(e);
        }

        let reservation = RoomReservation {
            id: self.next_room_reservation_id(),
            room_id: req.room_id,
            date: req.date,
            start_time: req.start_time,
            end_time: req.end_time,
            user_id: req.user_id,
        };
        let event = Event::RoomBooked {
            reservation: reservation.clone(),
        };
        self.persist_and_apply_room(&mut guard, &event, today).await?;
        metrics::counter!(observability::BOOKINGS_TOTAL, "resource" => "room").increment(1);
        drop(guard);
        drop(users);

        self.maybe_compact().await;
        Ok(reservation)
    }

    pub async fn create_car_reservation(
        &self,
        req: NewCarReservation,
    ) -> Result<CarReservation, EngineError> {
        if let Some(end) = req.end_time
            && end <= req.start_time
        {
            return Err(EngineError::Validation("startTime must be before endTime"));
        }
        let destination = req.destination.unwrap_or_default();
        let purpose = req.purpose.unwrap_or_default();
        check_len(&destination, MAX_TEXT_LEN, "destination too long")?;
        check_len(&purpose, MAX_TEXT_LEN, "purpose too long")?;

        let users = self.users.read().await;
        if !users.contains_key(&req.user_id) {
            return Err(EngineError::NotFound {
                what: "user",
                id: req.user_id,
            });
        }

        let car = self.get_car(&req.car_id).ok_or(EngineError::NotFound {
            what: "car",
            id: req.car_id,
        })?;
        let mut guard = car.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on car"));
        }

        let today = conflict::today();
        if self.policy().checks(req.date, today)
            && let Err(e) = check_car_free(&guard.reservations, req.date)
        {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL, "resource" => "car")
                .increment(1);
            return Err(e);
        }

        let reservation = CarReservation {
            id: self.next_car_reservation_id(),
            car_id: req.car_id,
            date: req.date,
            start_time: req.start_time,
            end_time: req.end_time,
            destination,
            purpose,
            user_id: req.user_id,
            returned: false,
            return_time: None,
            fuel_level_return: None,
            final_odometer: None,
            notes: None,
        };
        let event = Event::CarBooked {
            reservation: reservation.clone(),
        };
        self.persist_and_apply_car(&mut guard, &event, today).await?;
        metrics::counter!(observability::BOOKINGS_TOTAL, "resource" => "car").increment(1);
        drop(guard);
        drop(users);

        self.maybe_compact().await;
        Ok(reservation)
    }

    // ── Checkout/return state machine ────────────────────

    /// Close an active car reservation: `active → returned`, exactly once.
    /// Selector is the explicit reservation id, or — when absent — the most
    /// recently created active reservation for `car_id` (highest id wins).
    pub async fn return_car(
        &self,
        req: CarReturnRequest,
    ) -> Result<CarReservation, EngineError> {
        if let Some(level) = req.fuel_level {
            check_fuel(level)?;
        }
        let notes = req.notes.unwrap_or_default();
        check_len(&notes, MAX_NOTES_LEN, "notes too long")?;

        let car_id = match (req.reservation_id, req.car_id) {
            (Some(rid), _) => self
                .car_for_reservation(&rid)
                .ok_or(EngineError::NotFound {
                    what: "reservation",
                    id: rid,
                })?,
            (None, Some(cid)) => cid,
            (None, None) => {
                return Err(EngineError::Validation("reservationId or carId is required"));
            }
        };

        let car = self.get_car(&car_id).ok_or(EngineError::NotFound {
            what: "car",
            id: car_id,
        })?;
        let mut guard = car.write().await;

        let reservation_id = match req.reservation_id {
            Some(rid) => {
                let target = guard
                    .reservations
                    .iter()
                    .find(|r| r.id == rid)
                    .ok_or(EngineError::NotFound {
                        what: "reservation",
                        id: rid,
                    })?;
                if target.returned {
                    return Err(EngineError::AlreadyReturned(rid));
                }
                rid
            }
            None => {
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.is_active())
                    .max_by_key(|r| r.id)
                    .ok_or(EngineError::NotFound {
                        what: "active reservation for car",
                        id: car_id,
                    })?
                    .id
            }
        };

        let return_time = req.return_time.unwrap_or_else(conflict::now_hm);
        let end_time = req.end_time.unwrap_or(return_time);
        let event = Event::CarReturned {
            reservation_id,
            car_id,
            return_time,
            end_time,
            fuel_level: req.fuel_level,
            odometer: req.final_odometer,
            notes,
        };
        let today = conflict::today();
        self.persist_and_apply_car(&mut guard, &event, today).await?;
        metrics::counter!(observability::CAR_RETURNS_TOTAL).increment(1);

        let returned = guard
            .reservations
            .iter()
            .find(|r| r.id == reservation_id)
            .cloned()
            .ok_or(EngineError::NotFound {
                what: "reservation",
                id: reservation_id,
            })?;
        drop(guard);

        self.maybe_compact().await;
        Ok(returned)
    }
}
