use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Share of the annual allocation (katanomes_etous) above which a request is
/// flagged for reallocation review.
pub const REALLOCATION_REVIEW_RATIO: Decimal = dec!(0.20);

/// Number of recent notification fingerprints remembered by the dispatcher.
pub const NOTIFICATION_DEDUP_WINDOW: usize = 64;

/// Capacity of the cache invalidation broadcast channel.
pub const CACHE_EVENT_CAPACITY: usize = 256;

/// Client identifier sent in the connection handshake.
pub const CLIENT_NAME: &str = "relief-budget";

/// Wire protocol version sent in the connection handshake.
pub const PROTOCOL_VERSION: u32 = 1;
