use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for creation timestamps.
pub type Ms = i64;

/// Wall-clock minutes since midnight, the only time-of-day type.
pub type Minutes = u32;

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`. Shared edges count.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", format_clock(self.start), format_clock(self.end))
    }
}

/// Parse an `HH:MM` wall-clock string.
pub fn parse_clock(s: &str) -> Option<Minutes> {
    let t = NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()?;
    Some(t.hour() * 60 + t.minute())
}

pub fn format_clock(m: Minutes) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

pub fn clock_to_time(m: Minutes) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(m / 60, m % 60, 0)
}

/// Parse an ISO `YYYY-MM-DD` calendar date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub id: Ulid,
    pub user_id: String,
    /// ISO date as persisted. Bookings always write the canonical form, but
    /// replayed history is not re-validated.
    pub date: String,
    pub span: Span,
    pub category: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentRecord {
    pub id: Ulid,
    pub user_id: String,
    pub slot_id: Ulid,
    /// Copied from the owning slot at booking time.
    pub date: String,
    pub start: Minutes,
    pub equipment: String,
    pub created_at: Ms,
}

impl SlotRecord {
    /// The equipment bucket this slot's reservations land in.
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.date.clone(), self.span.start)
    }
}

impl EquipmentRecord {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.date.clone(), self.start)
    }
}

/// A slot's footprint on its day, the unit of overlap counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub id: Ulid,
    pub span: Span,
}

/// All slots booked on one date, the capacity bucket for slot admission.
#[derive(Debug, Clone)]
pub struct DayState {
    pub date: String,
    /// Sorted by `span.start`.
    pub occupancy: Vec<Occupancy>,
}

impl DayState {
    pub fn new(date: String) -> Self {
        Self {
            date,
            occupancy: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, occ: Occupancy) {
        let pos = self
            .occupancy
            .partition_point(|o| o.span.start <= occ.span.start);
        self.occupancy.insert(pos, occ);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Occupancy> {
        let pos = self.occupancy.iter().position(|o| o.id == id)?;
        Some(self.occupancy.remove(pos))
    }

    /// Slots whose span overlaps the query window.
    /// Uses binary search to skip slots starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Occupancy> {
        let right_bound = self
            .occupancy
            .partition_point(|o| o.span.start < query.end);
        self.occupancy[..right_bound]
            .iter()
            .filter(move |o| o.span.overlaps(query))
    }

    pub fn count_overlapping(&self, query: &Span) -> usize {
        self.overlapping(query).count()
    }
}

/// Equipment bucket key: one date and slot start time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub date: String,
    pub start: Minutes,
}

impl SessionKey {
    pub fn new(date: impl Into<String>, start: Minutes) -> Self {
        Self {
            date: date.into(),
            start,
        }
    }
}

/// All equipment reservations at one `(date, start)`. Holds every row any of
/// the three equipment checks can count, so one lock covers them all.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub reservations: Vec<EquipmentRecord>,
}

impl SessionState {
    pub fn insert(&mut self, record: EquipmentRecord) {
        self.reservations.push(record);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<EquipmentRecord> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn find(&self, user_id: &str, slot_id: Ulid, equipment: &str) -> Option<&EquipmentRecord> {
        self.reservations
            .iter()
            .find(|r| r.slot_id == slot_id && r.user_id == user_id && r.equipment == equipment)
    }

    pub fn count_for_user_slot(&self, user_id: &str, slot_id: Ulid) -> usize {
        self.reservations
            .iter()
            .filter(|r| r.slot_id == slot_id && r.user_id == user_id)
            .count()
    }

    pub fn count_for_equipment(&self, equipment: &str) -> usize {
        self.reservations
            .iter()
            .filter(|r| r.equipment == equipment)
            .count()
    }

    pub fn ids_for_slot(&self, slot_id: Ulid) -> Vec<Ulid> {
        self.reservations
            .iter()
            .filter(|r| r.slot_id == slot_id)
            .map(|r| r.id)
            .collect()
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotBooked(SlotRecord),
    SlotDeleted { id: Ulid },
    EquipmentBooked(EquipmentRecord),
    EquipmentReleased { id: Ulid },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: Ulid,
    pub user_id: String,
    pub date: String,
    pub start: Minutes,
    pub end: Minutes,
    pub category: String,
    pub created_at: Ms,
}

impl From<&SlotRecord> for SlotInfo {
    fn from(r: &SlotRecord) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id.clone(),
            date: r.date.clone(),
            start: r.span.start,
            end: r.span.end,
            category: r.category.clone(),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquipmentInfo {
    pub id: Ulid,
    pub user_id: String,
    pub slot_id: Ulid,
    pub date: String,
    pub start: Minutes,
    pub equipment: String,
    pub created_at: Ms,
}

impl From<&EquipmentRecord> for EquipmentInfo {
    fn from(r: &EquipmentRecord) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id.clone(),
            slot_id: r.slot_id,
            date: r.date.clone(),
            start: r.start,
            equipment: r.equipment.clone(),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquipmentAvailability {
    pub equipment: String,
    pub remaining: u32,
}
