//! Storage layer: SQLite segments and the switcher that rotates them

pub mod segment;
pub mod switcher;

pub use segment::{is_segment_file, Segment, SegmentNamer, SegmentReader, StoredEvent};
pub use switcher::{Switcher, SwitcherStats};
