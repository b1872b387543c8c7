//! Database models for pagelinks.
//!
//! These models map directly to the database schema and handle
//! serialization/deserialization of JSON fields.

pub mod job;
pub mod page;
pub mod user;

pub use job::*;
pub use page::*;
pub use user::*;
