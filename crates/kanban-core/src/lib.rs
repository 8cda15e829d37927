pub mod allocator;
pub mod config;
pub mod error;
pub mod io;
pub mod ledger;
pub mod paths;
pub mod record;
pub mod scanner;
pub mod sync;
pub mod types;
pub mod validate;

pub use error::{KanbanError, Result};
