//! The opaque transaction-scope token this layer consumes.
//!
//! Transaction-id provisioning is the surrounding transaction manager's
//! job (`spec.md` §1, out of scope); this crate only needs an ordering-
//! free, comparable token to decide which temp files get cleaned up when
//! a scope ends.

/// A subtransaction id, opaque to this layer beyond equality.
pub type SubXactId = u64;

/// The id representing "no nested scope" — i.e. the top-level
/// transaction, or process scope outside any transaction.
pub const TOP_LEVEL_SUBXACT: SubXactId = 0;
