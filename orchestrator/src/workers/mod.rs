//! Background workers

pub mod dispatcher;
pub mod queue;

pub use queue::{queue, Job, JobReceiver, JobSender};
