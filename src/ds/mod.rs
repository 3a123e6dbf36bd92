pub mod frequency_sketch;
pub mod segment_list;

pub use frequency_sketch::{CountMin4, Frequency, PerfectFrequency, SketchKind};
pub use segment_list::{SegmentIter, SegmentList, SlotId};
