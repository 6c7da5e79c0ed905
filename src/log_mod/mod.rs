mod log_manager;
mod log_record;
mod segment;

pub use log_manager::{LogIterator, LogManager};
pub use log_record::{LogRecord, LogRecordType};
pub use segment::{Segment, SegmentIterator, SegmentManager};
