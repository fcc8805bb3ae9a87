//! Core components of litua, a tool that reads a text document as a
//! tree, hands the tree to Lua hooks and writes the transformed string
//! back out.

pub mod lang;
pub mod runtime;
pub mod types;
