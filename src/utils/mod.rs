//! Internal data structures.
//!
//! Exposes the [`Arena`] used to pool watch and timer objects. Slots are
//! reused after removal, and every handle carries the generation of the
//! slot it was created from so that stale handles are rejected instead of
//! silently aliasing a recycled object.

mod arena;

pub(crate) use arena::Arena;
