//! Data types shared across the crate.
//!
//! # Interdependency graph
//!
//! ```text
//! position ───▶ token
//!     │
//!     └───────▶ error
//!
//! tree (standalone)
//! ```

pub mod error;
pub mod position;
pub mod token;
pub mod tree;
