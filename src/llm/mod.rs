// LLM abstraction layer

pub mod provider;
pub mod ollama;
pub mod google;
pub mod invoker;

pub use invoker::{InferenceError, InferenceOutput, InferenceSettings, Invoker};
pub use provider::*;
