//! The placement/retention policy layer: spreads blobs across the "new"
//! span, rotates old/current/new, and contains data-corruption.

pub mod old_current_new;

pub use old_current_new::{OldCurrentNewLocationBlobMap, ResolvedLocation, Stats, StatsSnapshot};
