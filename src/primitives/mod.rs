//! Stock state machines and typed handles over them.
//!
//! - [`Counter`] / [`SharedCounter`]: a signed counter
//! - [`SmrMap`] / [`SharedMap`]: an ordered map with per-key conflicts

mod counter;
mod map;

pub use counter::{Counter, SharedCounter};
pub use map::{SharedMap, SmrMap};
