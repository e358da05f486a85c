//! Device drivers for the two T-Cube models handled by this crate.

pub mod kpz101;
pub mod ksg101;

pub use kpz101::{Kpz101, PiezoSetup};
pub use ksg101::Ksg101;
