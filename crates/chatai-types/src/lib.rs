//! Wire types shared by the chatai crates.
//!
//! Everything here is serialised with camelCase field names, which is what
//! the browser client sends and expects.

pub mod api;
pub mod models;
