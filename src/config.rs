use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::limits::*;
use crate::model::{format_clock, parse_clock, Minutes, Span};

const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Allowed facility windows for one gender category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryHours {
    /// Canonical name, stored on every slot booked under this category.
    pub name: String,
    /// Ordered `[start, end)` windows.
    pub windows: Vec<Span>,
}

/// Facility rules, fixed once the engine is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacilityConfig {
    pub equipment_catalog: Vec<String>,
    /// Units of each equipment type (N).
    pub units_per_equipment: u32,
    pub max_equipment_per_slot: u32,
    pub categories: Vec<CategoryHours>,
    /// Ceiling on slots overlapping any instant of one date.
    pub max_concurrent_slots: u32,
    pub max_slot_minutes: Minutes,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    InvalidWindow { category: String, window: String },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config read failed: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse failed: {e}"),
            ConfigError::InvalidWindow { category, window } => {
                write!(f, "invalid window {window:?} for category {category}")
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

// ── On-disk JSON shape ───────────────────────────────────────────

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    equipment_catalog: Vec<String>,
    units_per_equipment: u32,
    max_equipment_per_slot: u32,
    categories: Vec<RawCategory>,
    max_concurrent_slots: u32,
    max_slot_minutes: Minutes,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCategory {
    name: String,
    windows: Vec<RawWindow>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWindow {
    start: String,
    end: String,
}

impl Default for FacilityConfig {
    /// The reference facility: two categories, eight equipment types,
    /// three units each.
    fn default() -> Self {
        let catalog = [
            "Chest Press",
            "Butterfly Machine",
            "Gym Benches",
            "Treadmill",
            "Dumbbells",
            "Spin Bike",
            "CrossCable machine",
            "Seated Leg Press",
        ];
        Self {
            equipment_catalog: catalog.iter().map(|s| s.to_string()).collect(),
            units_per_equipment: 3,
            max_equipment_per_slot: 3,
            categories: vec![
                CategoryHours {
                    name: "Male".into(),
                    windows: vec![Span::new(7 * 60, 9 * 60), Span::new(19 * 60, 21 * 60)],
                },
                CategoryHours {
                    name: "Female".into(),
                    windows: vec![
                        Span::new(9 * 60 + 30, 11 * 60),
                        Span::new(17 * 60, 18 * 60 + 30),
                    ],
                },
            ],
            max_concurrent_slots: 30,
            max_slot_minutes: 45,
        }
    }
}

impl FacilityConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut categories = Vec::with_capacity(raw.categories.len());
        for cat in raw.categories {
            let mut windows = Vec::with_capacity(cat.windows.len());
            for w in &cat.windows {
                let span = match (parse_clock(&w.start), parse_clock(&w.end)) {
                    (Some(start), Some(end)) if start < end => Span::new(start, end),
                    _ => {
                        return Err(ConfigError::InvalidWindow {
                            category: cat.name.clone(),
                            window: format!("{}-{}", w.start, w.end),
                        });
                    }
                };
                windows.push(span);
            }
            categories.push(CategoryHours {
                name: cat.name,
                windows,
            });
        }

        let config = Self {
            equipment_catalog: raw.equipment_catalog,
            units_per_equipment: raw.units_per_equipment,
            max_equipment_per_slot: raw.max_equipment_per_slot,
            categories,
            max_concurrent_slots: raw.max_concurrent_slots,
            max_slot_minutes: raw.max_slot_minutes,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.equipment_catalog.is_empty() {
            return Err(ConfigError::Invalid("equipment catalog is empty".into()));
        }
        if self.equipment_catalog.len() > MAX_CATALOG_SIZE {
            return Err(ConfigError::Invalid("equipment catalog too large".into()));
        }
        let mut seen = HashSet::new();
        for name in &self.equipment_catalog {
            if name.trim().is_empty() || name.len() > MAX_EQUIPMENT_NAME_LEN {
                return Err(ConfigError::Invalid(format!("bad equipment name {name:?}")));
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate equipment {name:?}")));
            }
        }

        if self.categories.is_empty() {
            return Err(ConfigError::Invalid("no gender categories".into()));
        }
        let mut seen = HashSet::new();
        for cat in &self.categories {
            if !seen.insert(cat.name.to_lowercase()) {
                return Err(ConfigError::Invalid(format!("duplicate category {:?}", cat.name)));
            }
            if cat.windows.is_empty() || cat.windows.len() > MAX_WINDOWS_PER_CATEGORY {
                return Err(ConfigError::Invalid(format!(
                    "category {} needs between 1 and {MAX_WINDOWS_PER_CATEGORY} windows",
                    cat.name
                )));
            }
            for w in &cat.windows {
                if w.start >= w.end || w.end > MINUTES_PER_DAY {
                    return Err(ConfigError::InvalidWindow {
                        category: cat.name.clone(),
                        window: format!("{}-{}", format_clock(w.start), format_clock(w.end)),
                    });
                }
            }
        }

        if self.units_per_equipment == 0
            || self.max_equipment_per_slot == 0
            || self.max_concurrent_slots == 0
            || self.max_slot_minutes == 0
        {
            return Err(ConfigError::Invalid("limits must be positive".into()));
        }
        Ok(())
    }

    /// Case-insensitive category lookup.
    pub fn category(&self, name: &str) -> Option<&CategoryHours> {
        let wanted = name.trim().to_lowercase();
        self.categories.iter().find(|c| c.name.to_lowercase() == wanted)
    }

    pub fn in_catalog(&self, equipment: &str) -> bool {
        self.equipment_catalog.iter().any(|e| e == equipment)
    }
}

impl std::fmt::Display for CategoryHours {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.name)?;
        for w in &self.windows {
            write!(f, " {}-{}", format_clock(w.start), format_clock(w.end))?;
        }
        Ok(())
    }
}
