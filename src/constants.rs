/// Width of the bounded string column used for Text fields
pub const TEXT_COLUMN_WIDTH: usize = 255;

/// Longest table or column name accepted in a schema declaration
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Name of the synthetic auto-increment identity column
pub const IDENTITY_COLUMN: &str = "id";

/// Default bound on a single storage call (seconds)
pub const DEFAULT_STORAGE_TIMEOUT_SECS: u64 = 5;

/// Default bound on a single outbound HTTP call (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Default chat-platform API root
pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Platform name shown on the role connection
pub const DEFAULT_PLATFORM_NAME: &str = "shikimori.me";

// =============================================================================
// Table Names
// =============================================================================

/// Chat-platform OAuth tokens, keyed by chat user id
pub const DISCORD_TOKENS_TABLE: &str = "discord_tokens";

/// Linked catalog profiles, keyed by chat user id
pub const USER_LINKS_TABLE: &str = "user_links";

// =============================================================================
// Error Messages
// =============================================================================

/// Error message for an empty authorization code
pub const ERR_EMPTY_CODE: &str = "Authorization code must not be empty";
