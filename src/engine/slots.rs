use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::MALFORMED_SLOTS_SKIPPED_TOTAL;

use super::admission::{check_capacity, validate_slot_request, validate_user};
use super::{record_admission, record_deletion, Engine, EngineError};

/// Wall-clock bounds of a stored slot, or None if the record doesn't parse.
fn slot_bounds(slot: &SlotInfo) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let date = parse_date(&slot.date)?;
    let start = date.and_time(clock_to_time(slot.start)?);
    let end = date.and_time(clock_to_time(slot.end)?);
    Some((start, end))
}

impl Engine {
    /// Admit a slot for `user_id` on `date` covering `[start, end)`.
    pub async fn book_slot(
        &self,
        user_id: &str,
        date: &str,
        start: &str,
        end: &str,
        category: &str,
    ) -> Result<Ulid, EngineError> {
        let started = Instant::now();
        let result = self.admit_slot(user_id, date, start, end, category).await;
        record_admission("slot", &result, started);
        match &result {
            Ok(id) => info!("slot {id} booked by {user_id} on {date} {start}-{end}"),
            Err(e) if e.is_store_failure() => {}
            Err(e) => debug!("slot rejected for {user_id} on {date} {start}-{end}: {e}"),
        }
        result
    }

    async fn admit_slot(
        &self,
        user_id: &str,
        date: &str,
        start: &str,
        end: &str,
        category: &str,
    ) -> Result<Ulid, EngineError> {
        validate_user(user_id)?;
        let req = validate_slot_request(&self.config, date, start, end, category)?;

        let _gate = self.commit_gate.read().await;
        let day = self.day(&req.date);
        let mut guard = day.write().await;
        check_capacity(&guard, &req.span, self.config.max_concurrent_slots)?;

        let record = SlotRecord {
            id: Ulid::new(),
            user_id: user_id.to_string(),
            date: req.date,
            span: req.span,
            category: req.category,
            created_at: now_ms(),
        };
        let id = record.id;
        let event = Event::SlotBooked(record);
        self.wal_append(&event).await?;
        self.apply_slot_event(&mut guard, &event);
        Ok(id)
    }

    /// All slots owned by `user_id`, in booking order.
    pub fn list_slots(&self, user_id: &str) -> Vec<SlotInfo> {
        let ids = self
            .user_slots
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.slots.get(id).map(|r| SlotInfo::from(r.value())))
            .collect()
    }

    /// True iff `now` falls within `[start, end]` of one of the user's slots.
    /// Stored slots whose date or times don't parse are skipped.
    pub fn is_user_active(&self, user_id: &str, now: NaiveDateTime) -> bool {
        for slot in self.list_slots(user_id) {
            let Some((start, end)) = slot_bounds(&slot) else {
                warn!(
                    "skipping slot {} with invalid date/time {:?} {}-{}",
                    slot.id, slot.date, slot.start, slot.end
                );
                metrics::counter!(MALFORMED_SLOTS_SKIPPED_TOTAL).increment(1);
                continue;
            };
            if start <= now && now <= end {
                return true;
            }
        }
        false
    }

    /// `is_user_active` against the local wall clock.
    pub fn is_user_active_now(&self, user_id: &str) -> bool {
        self.is_user_active(user_id, Local::now().naive_local())
    }

    /// Date and equipment bucket of `slot_id`, if `user_id` owns it.
    pub(super) fn owned_slot_date(
        &self,
        slot_id: Ulid,
        user_id: &str,
    ) -> Result<(String, SessionKey), EngineError> {
        match self.slots.get(&slot_id) {
            Some(r) if r.user_id == user_id => Ok((r.date.clone(), r.session_key())),
            _ => Err(EngineError::NotFoundOrUnauthorized),
        }
    }

    /// Delete a slot owned by `user_id`, releasing its equipment.
    pub async fn delete_slot(&self, slot_id: Ulid, user_id: &str) -> Result<(), EngineError> {
        let result = self.remove_slot(slot_id, user_id).await;
        record_deletion("slot", &result);
        if result.is_ok() {
            info!("slot {slot_id} deleted by {user_id}");
        }
        result
    }

    async fn remove_slot(&self, slot_id: Ulid, user_id: &str) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let (date, key) = self.owned_slot_date(slot_id, user_id)?;

        let day = self.day(&date);
        let mut day_guard = day.write().await;
        // A concurrent delete may have won while we waited.
        self.owned_slot_date(slot_id, user_id)?;

        // Equipment bookings re-check the slot under this lock, so none can
        // attach between the snapshot below and the commit.
        let session = self.session(&key);
        let mut session_guard = session.write().await;

        let mut events = vec![Event::SlotDeleted { id: slot_id }];
        events.extend(
            session_guard
                .ids_for_slot(slot_id)
                .into_iter()
                .map(|id| Event::EquipmentReleased { id }),
        );
        self.wal_commit(&events).await?;

        for event in &events {
            self.apply_slot_event(&mut day_guard, event);
            self.apply_equipment_event(&mut session_guard, event);
        }
        if events.len() > 1 {
            debug!(
                "released {} equipment reservations with slot {slot_id}",
                events.len() - 1
            );
        }
        Ok(())
    }
}
