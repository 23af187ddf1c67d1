pub mod schema;
pub mod writer;

pub use schema::*;
pub use writer::*;
