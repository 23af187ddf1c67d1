pub mod aggregator;
pub mod filter;
pub mod merger;
pub mod metrics;
pub mod processor;
pub mod report;
pub mod temporal;

pub use aggregator::*;
pub use filter::*;
pub use merger::*;
pub use metrics::*;
pub use processor::*;
pub use report::*;
pub use temporal::*;
