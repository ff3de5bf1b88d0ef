pub mod classify;
pub mod corpus;
pub mod error;
pub mod fetch;
pub mod known_phish;
pub mod preprocess;
pub mod similarity;
pub mod stats;
pub mod structure;

pub mod util;
