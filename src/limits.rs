/// Upper bound on the opaque user identifier handed in by the caller.
pub const MAX_USER_ID_LEN: usize = 256;

/// Upper bound on equipment names accepted into a catalog.
pub const MAX_EQUIPMENT_NAME_LEN: usize = 128;

/// Upper bound on catalog size.
pub const MAX_CATALOG_SIZE: usize = 256;

/// Upper bound on windows configured per category.
pub const MAX_WINDOWS_PER_CATEGORY: usize = 32;

/// Upper bound on names accepted by a single availability query.
pub const MAX_AVAILABILITY_NAMES: usize = 256;
