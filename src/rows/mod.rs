//! Row binding for scrollable lists.
//!
//! - [`binding`]: RowBindingCoordinator, the per-screen row -> locator table
//! - [`source`]: RowSource, implemented by the host list

pub mod binding;
pub mod source;
