//! The vendor-name similarity heuristic used by the certain tier.

/// Check whether one vendor name contains the other.
///
/// Both names are trimmed, lowercased, and stripped of ASCII and ideographic
/// spaces before the containment check, which runs in either direction.
/// Empty names never match. Anything fuzzier would silently change which
/// transactions reach which tier, so this stays a literal substring test.
pub fn names_match(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);

    if a.is_empty() || b.is_empty() {
        return false;
    }

    a.contains(&b) || b.contains(&a)
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase().replace(' ', "").replace('　', "")
}
