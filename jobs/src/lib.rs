pub mod engine;
pub mod error;
pub mod model;
pub mod workers;

pub use engine::{Processor, TaskEngine};
pub use error::JobError;
pub use model::{ItemStatus, ItemTask, Job, JobStatus, JobView};
