pub mod clock;
pub mod hashing;
pub mod ids;

pub use clock::{Clock, ManualClock, SystemClock};
pub use hashing::{constant_time_eq, hmac_sha256_hex, sha256_hex, stable_hash};
pub use ids::{prefixed_id, random_hex_id};
