//! Feature engineering: schema, vocabularies and the leakage-free builder.

pub mod builder;
pub mod schema;
pub mod vocabulary;

pub use builder::FeatureBuilder;
pub use schema::{FeatureSchema, FeatureVector, FEATURE_NAMES, NUM_FEATURES};
pub use vocabulary::Vocabulary;
