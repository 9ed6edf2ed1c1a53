//! Domain layer types and invariants.

pub mod entities;
pub mod routes;
pub mod slug;
