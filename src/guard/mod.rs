pub mod barrier;
pub mod timeout;

pub use barrier::GroupCloseBarrier;
pub use timeout::TimeoutGuard;
