//! Worker isolation runtime.
//!
//! Every logical unit runs as a single-threaded task owning its private
//! state, fed by one bounded mailbox. Workers never share mutable memory:
//! they exchange owned messages, and a `request` round trip pairs a message
//! with a oneshot reply slot. The supervisor owns worker lifecycles and is
//! the only place restart policy lives.

pub mod mailbox;
pub mod supervisor;
pub mod timer;

pub use mailbox::{
    Address, Flow, SendOutcome, Worker, WorkerExit, CONTROL_CAPACITY, CONTROL_TIMEOUT,
    DATA_CAPACITY, HOT_PATH_TIMEOUT,
};
pub use supervisor::{ChildStatus, Supervisor};
