//! Domain Layer
//!
//! Batches, bulks and dispatch messages, plus the pure scheduling rules
//! that operate on them.

pub mod entities;
pub mod invocation;
pub mod ports;
pub mod services;
pub mod value_objects;
