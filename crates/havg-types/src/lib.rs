#[allow(non_snake_case)]
pub mod status_code;

pub mod result;
pub mod status;
pub mod time;

// Re-export commonly used items at the crate root.
pub use result::{make_error, make_error_msg, Result};
pub use status::Status;
pub use status_code::*;
pub use time::{Duration, UtcTime};
