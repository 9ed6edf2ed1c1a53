//! Application services: the build pipeline, the mirror and the read-side
//! services behind the public router.

pub mod build;
pub mod context;
pub mod error;
pub mod markdown;
pub mod mirror;
pub mod render;
pub mod repos;
pub mod routes;
pub mod site;
pub mod sitemap;
pub mod syndication;
