//! Coordination store abstraction.
//!
//! The cluster core never talks to a concrete store; it programs against
//! [`KvStore`], which exposes exactly the primitives the coordination
//! protocol needs:
//!
//! - prefix reads observed at one consistent revision,
//! - linearizable multi-key compare-and-swap transactions,
//! - prefix watches delivering changes in revision order, batched per
//!   committed transaction,
//! - leases anchoring a node's liveness keys.
//!
//! Backends live in `havg-kv-backends`.

mod store;
mod types;

pub use store::KvStore;
pub use types::*;

/// Return the end key for a prefix range scan.
///
/// Increments the last non-0xFF byte of the prefix. If the prefix is empty
/// or all 0xFF bytes, returns an empty string meaning "no upper bound".
pub fn prefix_end(prefix: &str) -> String {
    let mut end = prefix.as_bytes().to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return String::from_utf8_lossy(&end).into_owned();
        }
        end.pop();
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_end_simple() {
        assert_eq!(prefix_end("VG"), "VH");
        assert_eq!(prefix_end("NODESTATE:"), "NODESTATE;");
    }

    #[test]
    fn test_prefix_end_empty() {
        assert_eq!(prefix_end(""), "");
    }
}
