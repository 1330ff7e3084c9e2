//! Local SQLite page index.

pub mod pages;

pub use pages::{IndexError, PageIndex, SearchHit};
