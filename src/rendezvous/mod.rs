pub mod flag;
pub mod registry;
pub mod task;

pub use flag::AwaitFlag;
pub use registry::{TaskLease, TaskRegistry};
pub use task::{Producer, Task, TaskState};
