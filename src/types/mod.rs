//! Core types shared by the executor and the primitives.
//!
//! - [`id`]: Identifier and time types (`TaskId`, `Time`)

pub mod id;

pub use id::{TaskId, Time};
