//! Short kebab-case build identifiers.
//!
//! Build uuids appear in namespaces, DNS names, and Helm release names, so
//! they must be short, lower-case, and DNS-safe. Collisions are caught by
//! the unique constraint and retried by the caller.

use rand::seq::SliceRandom;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "tidy", "brave", "calm", "eager", "fuzzy", "gentle", "happy", "jolly", "keen", "lively",
    "merry", "nimble", "proud", "quick", "sunny", "witty",
];

const ANIMALS: &[&str] = &[
    "otter", "heron", "lynx", "finch", "gecko", "ibis", "koala", "lemur", "marmot", "newt",
    "osprey", "panda", "quail", "raven", "stoat", "tapir",
];

/// e.g. `tidy-otter-4f2a`.
pub fn new_build_uuid() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).unwrap_or(&"tidy");
    let animal = ANIMALS.choose(&mut rng).unwrap_or(&"otter");
    let salt: u16 = rng.gen();
    format!("{adjective}-{animal}-{salt:04x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_are_kebab_and_dns_safe() {
        for _ in 0..50 {
            let uuid = new_build_uuid();
            assert!(uuid
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
            assert!(!uuid.starts_with('-') && !uuid.ends_with('-'));
            assert!(uuid.len() <= 30);
        }
    }
}
