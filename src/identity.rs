//! Deterministic peer-id derivation for [`crate::relay_peer::RelayPeer`] identities.
//!
//! `peer_id` is a pure function of its inputs (see invariant P6): given the same
//! `base_prefix`, `ending_num`, `memorable` flag and `offset`, it always returns the
//! same string. `ConnectionCtrl` is responsible for incrementing `ending_num` on
//! `unavailable-id` errors and recomputing the id from there.

/// Adjectives used to build "memorable" peer ids, e.g. `Autumn-Waterfall`.
pub const ADJECTIVES: [&str; 62] = [
    "Autumn", "Hidden", "Bitter", "Misty", "Silent", "Empty", "Dry", "Dark", "Summer", "Icy",
    "Delicate", "Quiet", "White", "Cool", "Spring", "Winter", "Patient", "Twilight", "Dawn",
    "Crimson", "Wispy", "Weathered", "Blue", "Billowing", "Broken", "Cold", "Damp", "Falling",
    "Frosty", "Green", "Long", "Late", "Lingering", "Bold", "Little", "Morning", "Muddy", "Old",
    "Red", "Rough", "Still", "Small", "Sparkling", "Wandering", "Withered", "Wild", "Black",
    "Young", "Holy", "Solitary", "Fragrant", "Aged", "Snowy", "Proud", "Floral", "Restless",
    "Divine", "Polished", "Ancient", "Purple", "Lively", "Nameless",
];

/// Nouns paired with [`ADJECTIVES`] to build "memorable" peer ids.
pub const NOUNS: [&str; 64] = [
    "Waterfall", "River", "Breeze", "Moon", "Rain", "Wind", "Sea", "Morning", "Snow", "Lake",
    "Sunset", "Pine", "Shadow", "Leaf", "Dawn", "Glitter", "Forest", "Hill", "Cloud", "Meadow",
    "Sun", "Glade", "Bird", "Brook", "Butterfly", "Bush", "Dew", "Dust", "Field", "Fire",
    "Flower", "Firefly", "Feather", "Grass", "Haze", "Mountain", "Night", "Pond", "Darkness",
    "Snowflake", "Silence", "Sound", "Sky", "Shape", "Surf", "Thunder", "Violet", "Water",
    "Wildflower", "Wave", "Water", "Resonance", "Sun", "Wood", "Dream", "Cherry", "Tree", "Fog",
    "Frost", "Voice", "Paper", "Frog", "Smoke", "Star",
];

/// Derives the peer id for a `RelayPeer`.
///
/// Numeric mode: `base_prefix` followed by the decimal `ending_num + offset`.
/// Memorable mode: an adjective-noun pair picked deterministically from `ending_num`
/// and `offset`, ignoring `base_prefix` entirely.
pub fn peer_id(base_prefix: &str, ending_num: u64, memorable: bool, offset: u64) -> String {
    if memorable {
        // clamp to >=1 so that offset==0 or ending_num==0 doesn't collapse every
        // relay onto row/column zero of the adjective/noun tables.
        let offset = offset.max(1);
        let n = ending_num.max(1);
        let adjective = ADJECTIVES[((n + offset) % ADJECTIVES.len() as u64) as usize];
        let noun = NOUNS[((n * offset) % NOUNS.len() as u64) as usize];
        format!("{adjective}-{noun}")
    } else {
        format!("{base_prefix}{}", ending_num + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_mode_is_base_plus_ending_num() {
        assert_eq!(peer_id("go-relay-", 0, false, 0), "go-relay-0");
        assert_eq!(peer_id("go-relay-", 4, false, 1), "go-relay-5");
    }

    #[test]
    fn memorable_mode_ignores_base_prefix() {
        let id = peer_id("go-relay-", 3, true, 2);
        assert!(id.contains('-'));
        assert!(!id.starts_with("go-relay-"));
    }

    #[test]
    fn is_pure() {
        for _ in 0..5 {
            assert_eq!(peer_id("x-", 7, true, 9), peer_id("x-", 7, true, 9));
            assert_eq!(peer_id("x-", 7, false, 9), peer_id("x-", 7, false, 9));
        }
    }

    #[test]
    fn zero_inputs_do_not_panic() {
        let _ = peer_id("x-", 0, true, 0);
    }
}
