pub mod columns;
pub mod loader;

pub use columns::*;
pub use loader::*;
