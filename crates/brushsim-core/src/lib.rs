#![allow(clippy::needless_range_loop, clippy::float_cmp, clippy::manual_range_contains,
         clippy::comparison_chain, clippy::collapsible_if, clippy::collapsible_else_if,
         clippy::field_reassign_with_default)]

//! Brush-model collision queries and the deterministic player movement
//! integrator built on top of them.

pub mod bsp;
pub mod collision;
pub mod movement;
pub mod shared;
