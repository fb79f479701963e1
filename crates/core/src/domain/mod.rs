pub mod document;
pub mod matching;
pub mod workflow;
