pub mod commands;
pub mod repl;

pub use commands::{execute, Outcome};
pub use repl::Repl;
