//! Dispatch core
//!
//! Call flow through a slot:
//!
//! ```text
//! DispatchTable::invoke(slot)
//!   ├── Unresolved  -> resolver installs a concrete behavior, re-invokes
//!   ├── LazyInit    -> calls the compiled function, swaps itself to Direct
//!   ├── Direct / StaticMethod / ClassMethod / Accessor
//!   ├── TypeChecked -> calls the current member, ReturnCheck on the result
//!   └── Missing     -> AttributeError
//! ```
//!
//! Member assignment goes through `patch::on_member_changed`, which rebuilds
//! the entry and pushes it to every subclass that does not override it.

pub mod awaitable;
pub mod enforcer;
pub mod patch;
pub mod resolver;
pub mod slot_map;
pub mod table;
pub mod thunk;

pub use awaitable::Awaitable;
pub use enforcer::ReturnCheck;
pub use slot_map::{Accessor, MemberKey, SlotMap};
pub use table::{DispatchTable, MissingState, SlotBehavior};
pub use thunk::{AccessorKind, AccessorThunk, CallMode, IndirectionRef, StaticThunk, TypeCheckState};
