//! UUID and short identifier utilities

use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parse UUID from string
pub fn parse(s: &str) -> Result<Uuid, uuid::Error> {
    Uuid::parse_str(s)
}

/// Generate a short alphanumeric identifier of `len` characters (max 32)
///
/// Used for session-local entity ids. Short ids can collide, so callers
/// that need uniqueness within a collection use [`unique_short_id`].
pub fn short_id(len: usize) -> String {
    let simple = Uuid::new_v4().simple().to_string();
    simple[..len.clamp(1, simple.len())].to_string()
}

/// Generate a short id that `taken` reports as unused
///
/// Widens the id after repeated collisions so the loop always terminates.
pub fn unique_short_id<F>(len: usize, taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let mut width = len;
    loop {
        for _ in 0..8 {
            let candidate = short_id(width);
            if !taken(&candidate) {
                return candidate;
            }
        }
        width = (width + 2).min(32);
    }
}
