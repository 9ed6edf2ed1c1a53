//! Live HTTP surface. The static build dispatches through this same router.

mod middleware;
mod public;

pub use public::{HttpState, build_router};
