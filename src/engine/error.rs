use crate::model::{format_clock, Minutes, Span};

#[derive(Debug)]
pub enum EngineError {
    InvalidTimeFormat(String),
    InvalidDateFormat(String),
    InvalidOrdering { start: Minutes, end: Minutes },
    DurationExceeded { minutes: Minutes, max: Minutes },
    UnsupportedCategory(String),
    OutsideFacilityHours { span: Span, category: String },
    CapacityExceeded(u32),
    UnknownEquipment(String),
    AlreadyBooked(String),
    UserSlotLimitExceeded(u32),
    EquipmentFullyBooked(String),
    /// Returned both for a missing record and for one owned by another user.
    NotFoundOrUnauthorized,
    LimitExceeded(&'static str),
    StoreUnavailable(String),
}

impl EngineError {
    /// Infrastructure failure, as opposed to a rejected request.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, EngineError::StoreUnavailable(_))
    }

    /// Stable label per variant, used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidTimeFormat(_) => "invalid_time_format",
            EngineError::InvalidDateFormat(_) => "invalid_date_format",
            EngineError::InvalidOrdering { .. } => "invalid_ordering",
            EngineError::DurationExceeded { .. } => "duration_exceeded",
            EngineError::UnsupportedCategory(_) => "unsupported_category",
            EngineError::OutsideFacilityHours { .. } => "outside_facility_hours",
            EngineError::CapacityExceeded(_) => "capacity_exceeded",
            EngineError::UnknownEquipment(_) => "unknown_equipment",
            EngineError::AlreadyBooked(_) => "already_booked",
            EngineError::UserSlotLimitExceeded(_) => "user_slot_limit_exceeded",
            EngineError::EquipmentFullyBooked(_) => "equipment_fully_booked",
            EngineError::NotFoundOrUnauthorized => "not_found_or_unauthorized",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidTimeFormat(s) => {
                write!(f, "invalid time format {s:?}: use HH:MM")
            }
            EngineError::InvalidDateFormat(s) => {
                write!(f, "invalid date format {s:?}: use YYYY-MM-DD")
            }
            EngineError::InvalidOrdering { start, end } => write!(
                f,
                "end time {} must be after start time {}",
                format_clock(*end),
                format_clock(*start)
            ),
            EngineError::DurationExceeded { minutes, max } => write!(
                f,
                "slot duration cannot exceed {max} minutes: requested {minutes} minutes"
            ),
            EngineError::UnsupportedCategory(c) => {
                write!(f, "no facility hours defined for category {c:?}")
            }
            EngineError::OutsideFacilityHours { span, category } => {
                write!(f, "slot time ({span}) is outside facility hours for {category}")
            }
            EngineError::CapacityExceeded(cap) => {
                write!(f, "capacity {cap} exceeded: too many overlapping slots")
            }
            EngineError::UnknownEquipment(name) => {
                write!(f, "unknown equipment {name:?}")
            }
            EngineError::AlreadyBooked(name) => {
                write!(f, "{name} is already booked for this slot")
            }
            EngineError::UserSlotLimitExceeded(max) => {
                write!(f, "at most {max} pieces of equipment per slot")
            }
            EngineError::EquipmentFullyBooked(name) => {
                write!(f, "{name} is fully booked for this slot")
            }
            EngineError::NotFoundOrUnauthorized => write!(f, "not found or unauthorized"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
