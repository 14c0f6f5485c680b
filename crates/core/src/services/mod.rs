pub mod bundlers;
pub mod differ;
pub mod hasher;
pub mod isolator;
pub mod orchestrator;
pub mod pipeline;
