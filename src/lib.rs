//! envforge - development environment build-plan compiler
//!
//! Compiles a declarative environment definition into a filesystem build
//! plan: independent components are computed as isolated diffs against a
//! shared ancestor and merged in one shot, while cross-cutting chains
//! (conda rewriting shell startup files) are strictly sequenced.

pub mod backend;
pub mod cache;
pub mod cli;
pub mod collab;
pub mod compiler;
pub mod error;
pub mod graph;
pub mod shell;

pub use compiler::Compiler;
pub use error::{ForgeError, ForgeResult};
pub use graph::{Graph, Shell};
