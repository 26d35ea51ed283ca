//! Plaintext set intersection, the baseline the cryptographic protocol is
//! checked against in tests and demos. No privacy: both inputs are local.

use std::collections::HashSet;

/// Identifiers present in both lists.
#[must_use]
pub fn raw_intersection(alice_ids: &[i64], bob_ids: &[i64]) -> HashSet<i64> {
    let alice: HashSet<i64> = alice_ids.iter().copied().collect();
    bob_ids
        .iter()
        .copied()
        .filter(|id| alice.contains(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_intersection() {
        let result = raw_intersection(&[1, 2, 3, 4], &[6, 5, 4, 3]);
        assert_eq!(result, HashSet::from([3, 4]));
    }

    #[test]
    fn test_raw_intersection_disjoint() {
        assert!(raw_intersection(&[1, 2], &[3, 4]).is_empty());
    }
}
