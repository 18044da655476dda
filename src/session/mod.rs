// Session timing and hourly re-parameterization
pub mod clock;
pub mod parameters;

pub use clock::{Clock, ManualClock, SessionClock, SystemClock, WaitOutcome};
pub use parameters::{ParameterChange, ParameterController};
