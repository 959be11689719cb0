//! Constants used throughout the mergeview library.
//!
//! This module provides central definitions for the reserved field ids and the
//! metadata keys of the exported data format.

/// Pseudo field id selecting the key of a path's record.
pub const KEY_FIELD: &str = "$key";

/// Pseudo field id selecting the whole value of a path's record.
pub const VALUE_FIELD: &str = "$value";

/// Metadata key carrying a node's priority in exported data.
pub const PRIORITY_KEY: &str = ".priority";

/// Metadata key wrapping a primitive that carries a priority in exported data.
pub const VALUE_KEY: &str = ".value";

/// Alphabet used by push ids, in ascending sort order.
pub const PUSH_CHARS: &[u8; 64] =
    b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";
