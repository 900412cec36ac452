pub mod config;
pub mod ml;
pub mod model;
pub mod normalizer;
pub mod sample;
pub mod storage;
pub mod utils;
