// Interactive console client

pub mod tree;
pub mod controllers;
pub mod render;
pub mod runtime;

pub use runtime::{run_session, ClientContext, Console};
pub use tree::{CommandTree, Dispatch};
