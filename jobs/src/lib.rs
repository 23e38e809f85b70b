//! # Jobs
//!
//! Job records, their lifecycle state machine, and the argument and transfer
//! staging that belongs to each record.
//!
//! ## Lifecycle
//!
//! ```text
//! acquire -> REQUESTED -> SCHEDULED -> RUNNING -> FINISHED -> release
//! ```
//!
//! - Arguments, kernel id, slot and transfers may only change while REQUESTED
//! - The return value may be read only once FINISHED
//! - `release` is accepted in every state and recycles the record
//!
//! ## Ownership
//!
//! A [`JobTable`] owns one [`ArgumentStore`] per record. Transfers own their
//! device allocation and give it back when the argument is replaced or the
//! job is released.

pub mod argument;
pub mod table;
pub mod transfer;

pub use argument::{Argument, ArgumentStore};
pub use table::JobTable;
pub use transfer::{shared_buffer, SharedBuffer, Transfer, TransferDescriptor};
