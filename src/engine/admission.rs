use ulid::Ulid;

use crate::config::FacilityConfig;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// A slot request that passed every check not needing store state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SlotRequest {
    /// Canonical `YYYY-MM-DD`.
    pub date: String,
    pub span: Span,
    /// Canonical configured category name.
    pub category: String,
}

pub(crate) fn validate_user(user_id: &str) -> Result<(), EngineError> {
    if user_id.is_empty() {
        return Err(EngineError::LimitExceeded("user id is empty"));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(EngineError::LimitExceeded("user id too long"));
    }
    Ok(())
}

fn clock(s: &str) -> Result<Minutes, EngineError> {
    parse_clock(s).ok_or_else(|| EngineError::InvalidTimeFormat(s.to_string()))
}

fn canonical_date(s: &str) -> Result<String, EngineError> {
    parse_date(s)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .ok_or_else(|| EngineError::InvalidDateFormat(s.to_string()))
}

/// Steps 1-5 of slot admission, in order, stopping at the first failure.
/// The capacity step needs the day's lock and lives in `check_capacity`.
pub(crate) fn validate_slot_request(
    config: &FacilityConfig,
    date: &str,
    start: &str,
    end: &str,
    category: &str,
) -> Result<SlotRequest, EngineError> {
    let start = clock(start)?;
    let end = clock(end)?;
    let date = canonical_date(date)?;

    if start >= end {
        return Err(EngineError::InvalidOrdering { start, end });
    }

    let minutes = end - start;
    if minutes > config.max_slot_minutes {
        return Err(EngineError::DurationExceeded {
            minutes,
            max: config.max_slot_minutes,
        });
    }

    let hours = config
        .category(category)
        .ok_or_else(|| EngineError::UnsupportedCategory(category.to_string()))?;

    let span = Span::new(start, end);
    if !hours.windows.iter().any(|w| w.contains_span(&span)) {
        return Err(EngineError::OutsideFacilityHours {
            span,
            category: hours.name.clone(),
        });
    }

    Ok(SlotRequest {
        date,
        span,
        category: hours.name.clone(),
    })
}

/// Step 6: reject if `ceiling` slots already overlap `span` on this day.
pub(crate) fn check_capacity(day: &DayState, span: &Span, ceiling: u32) -> Result<(), EngineError> {
    if day.count_overlapping(span) >= ceiling as usize {
        return Err(EngineError::CapacityExceeded(ceiling));
    }
    Ok(())
}

/// Duplicate, per-user and inventory checks, in that order, against one
/// session bucket. Caller holds the bucket's write lock.
pub(crate) fn check_equipment(
    session: &SessionState,
    config: &FacilityConfig,
    user_id: &str,
    slot_id: Ulid,
    equipment: &str,
) -> Result<(), EngineError> {
    if session.find(user_id, slot_id, equipment).is_some() {
        return Err(EngineError::AlreadyBooked(equipment.to_string()));
    }
    if session.count_for_user_slot(user_id, slot_id) >= config.max_equipment_per_slot as usize {
        return Err(EngineError::UserSlotLimitExceeded(config.max_equipment_per_slot));
    }
    if session.count_for_equipment(equipment) >= config.units_per_equipment as usize {
        return Err(EngineError::EquipmentFullyBooked(equipment.to_string()));
    }
    Ok(())
}

/// Parse a client-supplied `(date, start)` into a bucket key.
pub(crate) fn session_key(date: &str, start: &str) -> Result<SessionKey, EngineError> {
    let start = clock(start)?;
    let date = canonical_date(date)?;
    Ok(SessionKey::new(date, start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(start: &str, end: &str, category: &str) -> Result<SlotRequest, EngineError> {
        validate_slot_request(&FacilityConfig::default(), "2024-07-03", start, end, category)
    }

    #[test]
    fn accepts_slot_inside_window() {
        let req = validate("07:00", "07:45", "male").unwrap();
        assert_eq!(req.span, Span::new(420, 465));
        assert_eq!(req.category, "Male");
        assert_eq!(req.date, "2024-07-03");
    }

    #[test]
    fn accepts_slot_matching_window_edges() {
        // Female 09:30-11:00 is 90 minutes; check both edges with 45-minute slots.
        assert!(validate("09:30", "10:15", "Female").is_ok());
        assert!(validate("10:15", "11:00", "Female").is_ok());
        assert!(validate("08:15", "09:00", "Male").is_ok());
    }

    #[test]
    fn pipeline_order() {
        // Bad time beats everything else.
        assert!(matches!(
            validate("7-00", "06:00", "nobody"),
            Err(EngineError::InvalidTimeFormat(_))
        ));
        // Ordering beats duration and category.
        assert!(matches!(
            validate("09:00", "08:00", "nobody"),
            Err(EngineError::InvalidOrdering { .. })
        ));
        assert!(matches!(
            validate("08:00", "08:00", "Male"),
            Err(EngineError::InvalidOrdering { .. })
        ));
        // Duration beats category.
        assert!(matches!(
            validate("07:00", "08:00", "nobody"),
            Err(EngineError::DurationExceeded { minutes: 60, max: 45 })
        ));
        // Category beats hours.
        assert!(matches!(
            validate("12:00", "12:30", "nobody"),
            Err(EngineError::UnsupportedCategory(_))
        ));
    }

    #[test]
    fn duration_reported_verbatim() {
        let err = validate("07:00", "08:00", "Male").unwrap_err();
        assert_eq!(
            err.to_string(),
            "slot duration cannot exceed 45 minutes: requested 60 minutes"
        );
        assert!(validate("07:00", "07:46", "Male").is_err());
        assert!(validate("07:00", "07:45", "Male").is_ok());
    }

    #[test]
    fn rejects_slot_past_window_end() {
        let err = validate("08:45", "09:30", "Male").unwrap_err();
        assert!(matches!(err, EngineError::OutsideFacilityHours { .. }));
        assert_eq!(
            err.to_string(),
            "slot time (08:45 - 09:30) is outside facility hours for Male"
        );
    }

    #[test]
    fn rejects_other_categories_window() {
        assert!(matches!(
            validate("09:30", "10:00", "Male"),
            Err(EngineError::OutsideFacilityHours { .. })
        ));
        assert!(validate("19:00", "19:30", "MALE").is_ok());
    }

    #[test]
    fn rejects_bad_date() {
        let config = FacilityConfig::default();
        let err = validate_slot_request(&config, "July 3", "07:00", "07:30", "Male").unwrap_err();
        assert!(matches!(err, EngineError::InvalidDateFormat(_)));
    }

    #[test]
    fn capacity_ceiling() {
        let mut day = DayState::new("2024-07-03".into());
        let span = Span::new(420, 450);
        for _ in 0..2 {
            check_capacity(&day, &span, 2).unwrap();
            day.insert(Occupancy { id: Ulid::new(), span });
        }
        assert!(matches!(
            check_capacity(&day, &span, 2),
            Err(EngineError::CapacityExceeded(2))
        ));
        // Adjacent window does not compete.
        check_capacity(&day, &Span::new(450, 480), 2).unwrap();
    }

    #[test]
    fn equipment_check_order() {
        let config = FacilityConfig::default();
        let slot = Ulid::new();
        let mut session = SessionState::default();
        let mut add = |user: &str, slot_id: Ulid, name: &str| {
            session.insert(EquipmentRecord {
                id: Ulid::new(),
                user_id: user.into(),
                slot_id,
                date: "2024-07-03".into(),
                start: 420,
                equipment: name.into(),
                created_at: 0,
            })
        };
        add("alice", slot, "Treadmill");
        add("alice", slot, "Dumbbells");
        add("alice", slot, "Spin Bike");
        add("bob", Ulid::new(), "Gym Benches");
        add("carol", Ulid::new(), "Gym Benches");
        add("dave", Ulid::new(), "Gym Benches");

        // Duplicate beats the per-user ceiling.
        assert!(matches!(
            check_equipment(&session, &config, "alice", slot, "Treadmill"),
            Err(EngineError::AlreadyBooked(_))
        ));
        // Per-user ceiling beats inventory.
        assert!(matches!(
            check_equipment(&session, &config, "alice", slot, "Gym Benches"),
            Err(EngineError::UserSlotLimitExceeded(3))
        ));
        assert!(matches!(
            check_equipment(&session, &config, "erin", Ulid::new(), "Gym Benches"),
            Err(EngineError::EquipmentFullyBooked(_))
        ));
        check_equipment(&session, &config, "erin", Ulid::new(), "Treadmill").unwrap();
    }

    #[test]
    fn user_id_limits() {
        assert!(validate_user("alice").is_ok());
        assert!(validate_user("").is_err());
        assert!(validate_user(&"x".repeat(MAX_USER_ID_LEN + 1)).is_err());
    }
}
