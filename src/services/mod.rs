pub mod link_builder;
pub mod normalizer;
pub mod orchestrator;
pub mod providers;

pub use orchestrator::Orchestrator;
