/// Default page size for pagination
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Maximum page size allowed
pub const MAX_PAGE_SIZE: i64 = 100;

// =============================================================================
// FOLDER CONSTANTS
// =============================================================================

/// Name of the fallback destination folder
pub const DEFAULT_FOLDER_NAME: &str = "Default";

// =============================================================================
// THUMBNAIL CONSTANTS
// =============================================================================

/// Bounding box used when a thumbnail request gives no size
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 256;

/// Largest bounding box a thumbnail request may ask for
pub const MAX_THUMBNAIL_SIZE: u32 = 2048;
