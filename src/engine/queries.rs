use crate::model::*;

use super::conflict;
use super::{Engine, EngineError, SharedCar, SharedRoom};

impl Engine {
    fn rooms_sorted(&self) -> Vec<SharedRoom> {
        let mut entries: Vec<(Id, SharedRoom)> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, rs)| rs).collect()
    }

    fn cars_sorted(&self) -> Vec<SharedCar> {
        let mut entries: Vec<(Id, SharedCar)> = self
            .cars
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, cs)| cs).collect()
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::new();
        for rs in self.rooms_sorted() {
            rooms.push(rs.read().await.room.clone());
        }
        rooms
    }

    pub async fn room(&self, id: Id) -> Result<Room, EngineError> {
        let rs = self
            .get_room(&id)
            .ok_or(EngineError::NotFound { what: "room", id })?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    pub async fn list_cars(&self) -> Vec<Car> {
        let mut cars = Vec::new();
        for cs in self.cars_sorted() {
            cars.push(cs.read().await.car.clone());
        }
        cars
    }

    pub async fn car(&self, id: Id) -> Result<Car, EngineError> {
        let cs = self
            .get_car(&id)
            .ok_or(EngineError::NotFound { what: "car", id })?;
        let guard = cs.read().await;
        Ok(guard.car.clone())
    }

    /// Ledger read with optional date/room filters. An unknown `roomId`
    /// yields an empty list, not an error — filters narrow, they don't probe.
    pub async fn list_room_reservations(
        &self,
        filter: RoomReservationFilter,
    ) -> Vec<RoomReservation> {
        let targets = match filter.room_id {
            Some(id) => self.get_room(&id).into_iter().collect(),
            None => self.rooms_sorted(),
        };

        let mut out = Vec::new();
        for rs in targets {
            let guard = rs.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| filter.date.is_none_or(|d| r.date == d))
                    .cloned(),
            );
        }
        out.sort_unstable_by_key(|r| r.id);
        out
    }

    pub async fn list_car_reservations(
        &self,
        filter: CarReservationFilter,
    ) -> Vec<CarReservation> {
        let targets = match filter.car_id {
            Some(id) => self.get_car(&id).into_iter().collect(),
            None => self.cars_sorted(),
        };

        let mut out = Vec::new();
        for cs in targets {
            let guard = cs.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| filter.date.is_none_or(|d| r.date == d))
                    .filter(|r| filter.user_id.is_none_or(|u| r.user_id == u))
                    .cloned(),
            );
        }
        out.sort_unstable_by_key(|r| r.id);
        out
    }

    /// One user's open items: every active car reservation plus today's room
    /// reservations.
    pub async fn user_reservations(
        &self,
        user_id: Id,
    ) -> Result<(Vec<CarReservation>, Vec<RoomReservation>), EngineError> {
        if !self.users.read().await.contains_key(&user_id) {
            return Err(EngineError::NotFound {
                what: "user",
                id: user_id,
            });
        }

        let mut car_reservations = Vec::new();
        for cs in self.cars_sorted() {
            let guard = cs.read().await;
            car_reservations.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.user_id == user_id && r.is_active())
                    .cloned(),
            );
        }
        car_reservations.sort_unstable_by_key(|r| r.id);

        let today = conflict::today();
        let mut room_reservations = Vec::new();
        for rs in self.rooms_sorted() {
            let guard = rs.read().await;
            room_reservations.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.user_id == user_id && r.date == today)
                    .cloned(),
            );
        }
        room_reservations.sort_unstable_by_key(|r| r.id);

        Ok((car_reservations, room_reservations))
    }

    pub async fn list_users(&self) -> Vec<UserInfo> {
        self.users
            .read()
            .await
            .values()
            .map(UserInfo::from)
            .collect()
    }
}
