#![warn(missing_docs)]

//! ArtiVault locking subsystem: per-item read/write locks, session working copies, guarded state machines
//!
//! [`LockRegistry`] owns the lock state and committed snapshot of every
//! cached item. Callers work through a [`LockingSession`], which tracks the
//! items it touched and releases all of them when it ends.
//! [`GuardedStateMachine`] coordinates lifecycles of long-running components.

pub mod registry;
pub mod session;
pub mod state_machine;

pub use registry::{LockRegistry, RegistryStats};
pub use session::{LockMode, LockingSession, SessionId, SessionLockEntry};
pub use state_machine::{GuardedStateMachine, State};
