//! Win classifier: deterministic random forest of CART trees.

pub mod cart;
pub mod forest;
pub mod rng;

pub use forest::{Hyperparameters, RandomForest};
pub use rng::LcgRng;
