//! Error types for the `hashed-storage` crate.

/// Recoverable failures reported by the ordered collections.
///
/// Precondition violations inside the raw layers (out-of-range bits,
/// probing a table without a vacant bucket) are not represented here; they
/// panic, since they can only be reached through a bug in the caller.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A position does not name an element of the collection.
    #[error("position {position} is out of range for a collection of {len} elements")]
    PositionOutOfRange { position: usize, len: usize },

    /// A range of positions reaches past the end of the collection.
    #[error("range {start}..{end} is out of bounds for a collection of {len} elements")]
    RangeOutOfBounds { start: usize, end: usize, len: usize },

    /// The element is already stored at `position`.
    #[error("element is already present at position {position}")]
    DuplicateElement { position: usize },

    /// The requested capacity cannot be described by a valid allocation layout.
    #[error("capacity overflow")]
    CapacityOverflow,
}
