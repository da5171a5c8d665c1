//! Built-in dynamic variables
//!
//! These variables are prefixed with `$` and generate a new value on each
//! resolution.

use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

/// Names accepted by [`resolve`].
pub const BUILTIN_NAMES: &[&str] = &[
    "$uuid",
    "$randomUuid",
    "$timestamp",
    "$isoTimestamp",
    "$randomInt",
    "$date",
];

/// Generates the value of a built-in variable, or None for unknown names.
#[must_use]
pub fn resolve(name: &str) -> Option<String> {
    let value = match name {
        "$uuid" | "$randomUuid" => Uuid::new_v4().to_string(),
        "$timestamp" => Utc::now().timestamp().to_string(),
        "$isoTimestamp" => Utc::now().to_rfc3339(),
        "$randomInt" => rand::rng().random_range(0..=1000).to_string(),
        "$date" => Utc::now().format("%Y-%m-%d").to_string(),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_resolves() {
        for name in BUILTIN_NAMES {
            assert!(resolve(name).is_some(), "{name} should resolve");
        }
        assert!(resolve("$unknown").is_none());
        assert!(resolve("plain").is_none());
    }

    #[test]
    fn test_uuid_and_int_shapes() {
        assert!(Uuid::parse_str(&resolve("$uuid").unwrap()).is_ok());
        let n: u32 = resolve("$randomInt").unwrap().parse().unwrap();
        assert!(n <= 1000);
        assert_eq!(resolve("$date").unwrap().len(), 10);
    }
}
