use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::MAX_AVAILABILITY_NAMES;
use crate::model::*;

use super::admission::{check_equipment, session_key, validate_user};
use super::{record_admission, record_deletion, Engine, EngineError};

impl Engine {
    /// Reserve one unit of `equipment` inside a slot owned by `user_id`.
    /// Date and start time come from the slot record.
    pub async fn book_equipment(
        &self,
        user_id: &str,
        slot_id: Ulid,
        equipment: &str,
    ) -> Result<Ulid, EngineError> {
        let started = Instant::now();
        let result = self.admit_equipment(user_id, slot_id, equipment).await;
        record_admission("equipment", &result, started);
        match &result {
            Ok(id) => info!("equipment {id} ({equipment}) booked by {user_id} in slot {slot_id}"),
            Err(e) if e.is_store_failure() => {}
            Err(e) => debug!("equipment {equipment} rejected for {user_id} in slot {slot_id}: {e}"),
        }
        result
    }

    async fn admit_equipment(
        &self,
        user_id: &str,
        slot_id: Ulid,
        equipment: &str,
    ) -> Result<Ulid, EngineError> {
        validate_user(user_id)?;
        if !self.config.in_catalog(equipment) {
            return Err(EngineError::UnknownEquipment(equipment.to_string()));
        }

        let _gate = self.commit_gate.read().await;
        let (date, key) = self.owned_slot_date(slot_id, user_id)?;
        let session = self.session(&key);
        let mut guard = session.write().await;
        // The slot may have been deleted while we waited for the bucket.
        self.owned_slot_date(slot_id, user_id)?;

        check_equipment(&guard, &self.config, user_id, slot_id, equipment)?;

        let record = EquipmentRecord {
            id: Ulid::new(),
            user_id: user_id.to_string(),
            slot_id,
            date,
            start: key.start,
            equipment: equipment.to_string(),
            created_at: now_ms(),
        };
        let id = record.id;
        let event = Event::EquipmentBooked(record);
        self.wal_append(&event).await?;
        self.apply_equipment_event(&mut guard, &event);
        Ok(id)
    }

    /// Equipment `user_id` holds in `slot_id`, in booking order.
    pub async fn list_user_equipment(&self, user_id: &str, slot_id: Ulid) -> Vec<EquipmentInfo> {
        let key = match self.slots.get(&slot_id) {
            Some(r) => r.session_key(),
            None => return Vec::new(),
        };
        let Some(session) = self.sessions.get(&key).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let guard = session.read().await;
        guard
            .reservations
            .iter()
            .filter(|r| r.slot_id == slot_id && r.user_id == user_id)
            .map(EquipmentInfo::from)
            .collect()
    }

    /// Remaining units of each named equipment type at `(date, start)`.
    /// A snapshot: admission recounts under the bucket lock.
    pub async fn equipment_availability<S: AsRef<str>>(
        &self,
        date: &str,
        start: &str,
        catalog: &[S],
    ) -> Result<Vec<EquipmentAvailability>, EngineError> {
        if catalog.len() > MAX_AVAILABILITY_NAMES {
            return Err(EngineError::LimitExceeded("too many equipment names"));
        }
        let key = session_key(date, start)?;
        let units = self.config.units_per_equipment;

        let session = self.sessions.get(&key).map(|e| e.value().clone());
        let guard = match &session {
            Some(s) => Some(s.read().await),
            None => None,
        };

        Ok(catalog
            .iter()
            .map(|name| {
                let name = name.as_ref();
                let booked = guard.as_ref().map_or(0, |g| g.count_for_equipment(name));
                EquipmentAvailability {
                    equipment: name.to_string(),
                    remaining: units.saturating_sub(booked as u32),
                }
            })
            .collect())
    }

    /// `equipment_availability` over the configured catalog.
    pub async fn catalog_availability(
        &self,
        date: &str,
        start: &str,
    ) -> Result<Vec<EquipmentAvailability>, EngineError> {
        self.equipment_availability(date, start, self.config.equipment_catalog.as_slice())
            .await
    }

    pub async fn delete_equipment_reservation(
        &self,
        reservation_id: Ulid,
        user_id: &str,
    ) -> Result<(), EngineError> {
        let result = self.release_equipment(reservation_id, user_id).await;
        record_deletion("equipment", &result);
        if result.is_ok() {
            info!("equipment {reservation_id} released by {user_id}");
        }
        result
    }

    async fn release_equipment(
        &self,
        reservation_id: Ulid,
        user_id: &str,
    ) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let key = self.owned_reservation_key(reservation_id, user_id)?;
        let session = self.session(&key);
        let mut guard = session.write().await;
        self.owned_reservation_key(reservation_id, user_id)?;

        let event = Event::EquipmentReleased { id: reservation_id };
        self.wal_append(&event).await?;
        self.apply_equipment_event(&mut guard, &event);
        Ok(())
    }

    fn owned_reservation_key(
        &self,
        reservation_id: Ulid,
        user_id: &str,
    ) -> Result<SessionKey, EngineError> {
        match self.reservations.get(&reservation_id) {
            Some(r) if r.user_id == user_id => Ok(r.session_key()),
            _ => Err(EngineError::NotFoundOrUnauthorized),
        }
    }
}
