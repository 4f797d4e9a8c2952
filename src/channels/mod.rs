//! Front ends that drive an assessment outside the HTTP server.

pub mod cli;

pub use cli::{CliChannel, CliExit};
