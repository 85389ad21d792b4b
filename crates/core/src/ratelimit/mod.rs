//! Client-side rate limiting
//!
//! - [`BucketStore`]: per-route and global bucket state fed by response headers
//! - [`Governor`]: middleware that admits calls against the store

pub mod bucket_store;
pub mod governor;

pub use bucket_store::BucketStore;
pub use governor::Governor;
