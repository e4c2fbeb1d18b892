//! Display names for entities a hub reports without one.

/// Number of trailing id characters used in generated names.
const SUFFIX_LEN: usize = 6;

/// Build a name like `"Device a1b2c3"` from the last characters of `id`.
pub fn fallback_name(prefix: &str, id: &str) -> String {
    let count = id.chars().count();
    let suffix: String = id.chars().skip(count.saturating_sub(SUFFIX_LEN)).collect();
    format!("{prefix} {suffix}")
}
