pub mod event;
pub mod model;

pub use event::{BuildOutcome, Card, Envelope, Event, TaskRunStatus};
pub use model::*;
