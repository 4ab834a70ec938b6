//! Compile-time emit filtering.
//!
//! A [`CategoryFilter`] is chosen as a type parameter of
//! [`Log`](crate::Log). The predicates return constants after inlining, so
//! a disabled emit site compiles down to nothing.

/// Decides at monomorphization time which emissions a log accepts.
pub trait CategoryFilter: 'static {
    /// Whether messages with the given category are emitted.
    #[inline]
    fn message(category: u32) -> bool {
        let _ = category;
        true
    }

    /// Whether region framing is emitted.
    #[inline]
    fn regions() -> bool {
        true
    }

    /// Whether source-location messages are emitted.
    #[inline]
    fn source() -> bool {
        true
    }
}

/// Emits everything. The default filter.
pub struct LogEverything;

impl CategoryFilter for LogEverything {}

/// Emits nothing, turning every emit site into dead code.
pub struct LogNothing;

impl CategoryFilter for LogNothing {
    #[inline]
    fn message(_category: u32) -> bool {
        false
    }

    #[inline]
    fn regions() -> bool {
        false
    }

    #[inline]
    fn source() -> bool {
        false
    }
}

/// Emits messages whose category is at least `V`. Regions and source
/// locations stay enabled.
pub struct MinimumCategory<const V: u32>;

impl<const V: u32> CategoryFilter for MinimumCategory<V> {
    #[inline]
    fn message(category: u32) -> bool {
        category >= V
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters() {
        assert!(LogEverything::message(0));
        assert!(LogEverything::regions());
        assert!(!LogNothing::message(u32::MAX));
        assert!(!LogNothing::source());
        assert!(MinimumCategory::<5>::message(5));
        assert!(!MinimumCategory::<5>::message(4));
        assert!(MinimumCategory::<5>::regions());
    }
}
