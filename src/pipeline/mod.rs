pub mod normalize;
pub mod runner;
pub mod storage;
pub mod validate;
