//! Repository layer for database access.
//!
//! Each repository is a trait (so services can be tested against fakes) with
//! a SQLx implementation that reads from the read pool and writes through the
//! serialized write pool.

pub mod job;
pub mod page;
pub mod user;

pub use job::*;
pub use page::*;
pub use user::*;
