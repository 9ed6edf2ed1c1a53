//! Infrastructure adapters and runtime bootstrap.

pub mod artifacts;
pub mod assets;
pub mod atproto;
pub mod content;
pub mod error;
pub mod http;
pub mod mapping;
pub mod memory;
pub mod probe;
pub mod telemetry;
