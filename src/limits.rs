/// 2000-01-01T00:00:00Z. Timestamps before this are garbage input.
pub const MIN_VALID_TIMESTAMP_MS: i64 = 946_684_800_000;

/// 2100-01-01T00:00:00Z. Timestamps past this are garbage input.
pub const MAX_VALID_TIMESTAMP_MS: i64 = 4_102_444_800_000;

/// 90 days. No single booking may span longer than this.
pub const MAX_SPAN_DURATION_MS: i64 = 90 * 24 * 3_600_000;

/// Cap on ledger entries per space, canceled history included.
pub const MAX_BOOKINGS_PER_SPACE: usize = 100_000;

/// Widest occupancy report window, in whole days.
pub const MAX_REPORT_WINDOW_DAYS: i64 = 366;

/// Report window when a request doesn't name one, in whole days.
pub const DEFAULT_REPORT_WINDOW_DAYS: i64 = 30;

/// Usage ranking length when a request doesn't name one.
pub const DEFAULT_TOP_SPACES: usize = 5;

/// Review comments are truncated nowhere; anything longer is rejected.
pub const MAX_COMMENT_LEN: usize = 1_000;

/// Cardholder names longer than this are rejected outright.
pub const MAX_CARD_HOLDER_LEN: usize = 128;
