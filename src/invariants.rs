//! Runtime invariant checks with contract-test support.
//!
//! Production code states its invariants with [`check_invariant!`]. Each check
//! is recorded in a thread-local log so a test can assert that the code path
//! it drove actually verified the invariants it cares about.
//!
//! ```rust,ignore
//! use crabsoup::check_invariant;
//!
//! check_invariant!(queue.len() <= capacity, "outgoing video queue never exceeds capacity");
//!
//! #[test]
//! fn contract_video_queue() {
//!     // ... push frames ...
//!     crabsoup::invariants::contract_test("video queue", &[
//!         "outgoing video queue never exceeds capacity",
//!     ]);
//! }
//! ```
//!
//! A violation is logged at error level. Debug builds also panic, so tests
//! fail loudly; release builds keep media flowing.

use std::cell::RefCell;
use std::collections::HashSet;

thread_local! {
    static INVARIANT_LOG: RefCell<HashSet<&'static str>> = RefCell::new(HashSet::new());
}

/// Check an invariant and record it for contract testing. Evaluates to the
/// condition.
#[macro_export]
macro_rules! check_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariants::__check_invariant_impl($condition, $message, module_path!())
    };
}

#[doc(hidden)]
pub fn __check_invariant_impl(condition: bool, message: &'static str, context: &str) -> bool {
    INVARIANT_LOG.with(|log| {
        log.borrow_mut().insert(message);
    });

    if !condition {
        log::error!("invariant violated [{}]: {}", context, message);
        debug_assert!(condition, "INVARIANT VIOLATION [{}]: {}", context, message);
    }
    condition
}

/// Panic unless every listed invariant was checked on this thread.
pub fn contract_test(test_name: &str, required_invariants: &[&str]) {
    let missing: Vec<&str> = INVARIANT_LOG.with(|log| {
        let log = log.borrow();
        required_invariants
            .iter()
            .copied()
            .filter(|inv| !log.contains(inv))
            .collect()
    });

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: invariants never checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

pub fn clear_invariant_log() {
    INVARIANT_LOG.with(|log| log.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_invariant_is_recorded() {
        clear_invariant_log();
        assert!(crate::check_invariant!(1 + 1 == 2, "arithmetic holds"));
        contract_test("arithmetic", &["arithmetic holds"]);
    }

    #[test]
    #[should_panic(expected = "CONTRACT FAILURE")]
    fn test_unchecked_invariant_fails_contract() {
        clear_invariant_log();
        contract_test("nothing checked", &["never checked"]);
    }
}
