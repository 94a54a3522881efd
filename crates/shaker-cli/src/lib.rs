pub mod input;
pub mod output;
pub mod project;
pub mod runner;

pub use runner::Runner;
