//! Shared foundations for the BSP world renderer: vector/plane math,
//! dense bitsets, and the layered content filesystem.

pub mod bitset;
pub mod files;
pub mod math;
