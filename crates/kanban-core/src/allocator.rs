//! The allocation rule: one past the highest number either source has seen.
//!
//! Pure and order independent. Whichever of the scan and the ledger is
//! stale, the result is strictly greater than every number observed for the
//! prefix, and evaluating it twice on the same inputs gives the same answer.

use crate::error::{KanbanError, Result};
use crate::types::{Identifier, Prefix};

/// Next number given the scanned and ledger maxima for a prefix.
///
/// `None` when the highest observed number is `u64::MAX`: there is nothing
/// left above it.
pub fn next_number(scanned_max: Option<u64>, ledger_max: Option<u64>) -> Option<u64> {
    match scanned_max.max(ledger_max) {
        Some(n) => n.checked_add(1),
        None => Some(1),
    }
}

pub fn allocate(prefix: &Prefix, scanned_max: Option<u64>, ledger_max: Option<u64>) -> Result<Identifier> {
    let number = next_number(scanned_max, ledger_max).ok_or_else(|| KanbanError::NumberSpaceExhausted {
        prefix: prefix.to_string(),
    })?;
    Ok(Identifier::new(prefix.clone(), number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn feat() -> Prefix {
        Prefix::parse("FEAT").unwrap()
    }

    #[test]
    fn first_allocation_is_one() {
        assert_eq!(allocate(&feat(), None, None).unwrap().to_string(), "FEAT-1");
    }

    #[test]
    fn scan_dominates_stale_ledger() {
        assert_eq!(allocate(&feat(), Some(45), Some(41)).unwrap().to_string(), "FEAT-46");
    }

    #[test]
    fn ledger_dominates_stale_scan() {
        assert_eq!(next_number(Some(3), Some(10)), Some(11));
        assert_eq!(next_number(None, Some(608)), Some(609));
    }

    #[test]
    fn largest_number_in_use_cannot_be_exceeded() {
        assert_eq!(next_number(Some(u64::MAX), None), None);
        assert_eq!(next_number(Some(2), Some(u64::MAX)), None);
        let err = allocate(&feat(), Some(u64::MAX), Some(7)).unwrap_err();
        assert_eq!(err.kind(), "number_exhausted");
    }

    #[test]
    fn one_below_the_limit_still_allocates() {
        assert_eq!(next_number(Some(u64::MAX - 1), None), Some(u64::MAX));
    }

    proptest! {
        #[test]
        fn prop_is_max_plus_one(s in 0u64..1_000_000, l in 0u64..1_000_000) {
            prop_assert_eq!(next_number(Some(s), Some(l)), Some(s.max(l) + 1));
        }

        #[test]
        fn prop_is_deterministic(s in proptest::option::of(0u64..1_000), l in proptest::option::of(0u64..1_000)) {
            prop_assert_eq!(allocate(&feat(), s, l).unwrap(), allocate(&feat(), s, l).unwrap());
        }

        #[test]
        fn prop_exceeds_every_observation(s in proptest::option::of(0u64..1_000), l in proptest::option::of(0u64..1_000)) {
            let n = next_number(s, l).unwrap();
            prop_assert!(s.map_or(true, |s| n > s));
            prop_assert!(l.map_or(true, |l| n > l));
            prop_assert!(n >= 1);
        }

        #[test]
        fn prop_argument_order_is_irrelevant(a in proptest::option::of(0u64..1_000), b in proptest::option::of(0u64..1_000)) {
            prop_assert_eq!(next_number(a, b), next_number(b, a));
        }
    }
}
