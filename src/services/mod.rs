pub mod generator;
pub mod llm;
pub mod manga;
pub mod normalizer;
pub mod parser;
pub mod prompts;
pub mod workflow;
