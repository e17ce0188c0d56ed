pub mod runner;

pub use runner::{DeadLetter, TaskRunner};
