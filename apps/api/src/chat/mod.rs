pub mod controller;
pub mod error;
pub mod handlers;
pub mod normalizer;
pub mod prompts;
pub mod registry;
pub mod store;
pub mod streaming;
pub mod typewriter;

#[cfg(test)]
pub mod testing;
