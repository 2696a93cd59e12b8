//! Key ordering.
//!
//! A map or index either runs with natural byte-lexicographic order or with a
//! custom [`Comparator`] supplied by the application. The comparator must
//! define a total order over arbitrary byte strings; the engine stores keys in
//! that order and every range operation is expressed through it.

use std::cmp::Ordering;
use std::sync::Arc;

/// Total order over opaque keys.
pub trait Comparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Natural byte-lexicographic order, the default when no comparator is
/// installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalComparator;

impl Comparator for LexicalComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

impl<F> Comparator for F
where
    F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self(a, b)
    }
}

/// Resolves an optional custom comparator to a concrete ordering function.
pub(crate) fn resolve(custom: Option<&Arc<dyn Comparator>>) -> Arc<dyn Comparator> {
    custom
        .cloned()
        .unwrap_or_else(|| Arc::new(LexicalComparator))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_orders_by_bytes() {
        let cmp = LexicalComparator;
        assert_eq!(cmp.compare(b"a", b"b"), Ordering::Less);
        assert_eq!(cmp.compare(b"ab", b"a"), Ordering::Greater);
        assert_eq!(cmp.compare(b"", b""), Ordering::Equal);
    }

    #[test]
    fn closures_are_comparators() {
        // Reverse order via closure.
        let cmp = |a: &[u8], b: &[u8]| b.cmp(a);
        assert_eq!(cmp.compare(b"a", b"b"), Ordering::Greater);
    }
}
