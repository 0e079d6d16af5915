mod batch;
mod record;

pub use batch::ProgressBatch;
pub use record::{ProgressRecord, ProgressRecordError};
