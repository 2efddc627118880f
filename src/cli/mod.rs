//! CLI command handling

pub mod actions;
pub mod options;
pub mod output;
pub mod watch;

pub use actions::*;
pub use options::*;
pub use output::*;
pub use watch::*;
