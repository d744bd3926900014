//! Pipeline events: lifecycle reports and operational alerts.

mod handle;
mod types;
mod writer;

pub use handle::*;
pub use types::*;
pub use writer::*;
