//! Traits abstracting the engine's two external collaborators

pub mod graph_store;
pub mod script_sandbox;

pub use graph_store::{GraphStore, QueryOptions, QueryReply, Record};
pub use script_sandbox::ScriptSandbox;
