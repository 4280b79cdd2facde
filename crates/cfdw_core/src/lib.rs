//! Core library for the categories-for-discussion working-page processor:
//! parse semi-structured working pages into typed instructions, validate
//! and deduplicate them, resolve each to the discussion that produced it,
//! and execute the resulting category restructuring across every
//! referencing page.

pub mod check;
pub mod config;
pub mod discussion;
pub mod engine;
pub mod extract;
pub mod instruction;
pub mod line;
pub mod registry;
pub mod rewrite;
pub mod store;
pub mod title;
pub mod wikicode;
pub mod workpage;

#[cfg(test)]
pub(crate) mod fixtures;
