#![deny(clippy::cargo)]

pub mod mle;
pub mod util;
pub mod virtual_poly;
