pub mod dataset;
pub mod error;
pub mod experiment;
pub mod hierarchy;
pub mod injector;
pub mod labels;
pub mod matching;
pub mod scorer;
pub mod solver;

pub use error::{Result, SimError};
