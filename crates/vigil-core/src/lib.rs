pub mod clock;
pub mod error;
pub mod threshold;
pub mod time;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{Result, VigilError};
pub use threshold::Comparison;
pub use time::TimeRange;
pub use types::{Labels, Level};
