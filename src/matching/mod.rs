pub mod aggregator;
pub mod matcher;

pub use matcher::{Matcher, Thresholds};
