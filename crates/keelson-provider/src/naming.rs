//! Release naming

use rand::Rng;

const NAME_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SUFFIX_LENGTH: usize = 8;

/// Name used when the URN carries no resource name
pub const FALLBACK_BASE: &str = "release";

/// `base` followed by a dash and 8 random lowercase alphanumerics
pub fn autoname(base: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LENGTH)
        .map(|_| NAME_CHARSET[rng.random_range(0..NAME_CHARSET.len())] as char)
        .collect();
    format!("{base}-{suffix}")
}

/// Resource name at the end of a URN (`urn:...::<type>::<name>`)
pub fn resource_name(urn: &str) -> &str {
    urn.rsplit("::")
        .next()
        .filter(|name| !name.is_empty() && *name != urn)
        .unwrap_or(FALLBACK_BASE)
}
