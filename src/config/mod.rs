pub mod query;
pub mod settings;

pub use query::*;
pub use settings::*;
