//! Elements flowing through streams: data tuples and control tuples.

use crate::types::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Per-tuple annotations. Framing and windowing record here the segments a
/// tuple belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementMetadata {
    segment_ids: BTreeSet<i64>,
}

impl ElementMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment_ids(&self) -> &BTreeSet<i64> {
        &self.segment_ids
    }

    pub fn add_segment(&mut self, segment_id: i64) {
        self.segment_ids.insert(segment_id);
    }

    pub fn clear_segments(&mut self) {
        self.segment_ids.clear();
    }
}

/// An ordered sequence of values conforming to a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTuple {
    values: Vec<Value>,
    metadata: ElementMetadata,
}

impl DataTuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            metadata: ElementMetadata::default(),
        }
    }

    pub fn with_metadata(values: Vec<Value>, metadata: ElementMetadata) -> Self {
        Self { values, metadata }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn metadata(&self) -> &ElementMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut ElementMetadata {
        &mut self.metadata
    }

    pub fn segment_ids(&self) -> &BTreeSet<i64> {
        self.metadata.segment_ids()
    }

    /// Returns a new tuple with `extra` appended, keeping the metadata.
    pub fn extended(&self, extra: impl IntoIterator<Item = Value>) -> DataTuple {
        let mut values = self.values.clone();
        values.extend(extra);
        DataTuple {
            values,
            metadata: self.metadata.clone(),
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl fmt::Display for DataTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", value)?;
        }
        f.write_str(">")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PunctuationType {
    /// Closes a fixed size/slide window.
    Window,
    /// Closes a predicate-cut frame.
    Frame,
}

/// Punctuation announcing that a segment is complete.
///
/// `segment_start`/`segment_end` are the bounds of segment 0; the bounds of
/// segment `n` are shifted by `n * step_size`. Frames carry their absolute
/// bounds with a zero step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PunctuationControl {
    pub segment_id: i64,
    pub segment_start: i64,
    pub segment_end: i64,
    pub step_size: i64,
    pub punctuation_type: PunctuationType,
}

impl PunctuationControl {
    pub fn window(segment_id: i64, origin_start: i64, origin_end: i64, step_size: i64) -> Self {
        Self {
            segment_id,
            segment_start: origin_start,
            segment_end: origin_end,
            step_size,
            punctuation_type: PunctuationType::Window,
        }
    }

    pub fn frame(segment_id: i64, start: i64, end: i64) -> Self {
        Self {
            segment_id,
            segment_start: start,
            segment_end: end,
            step_size: 0,
            punctuation_type: PunctuationType::Frame,
        }
    }

    /// Absolute `(start, end)` bounds of the punctuated segment.
    pub fn absolute_bounds(&self) -> (i64, i64) {
        let shift = self.segment_id.saturating_mul(self.step_size);
        (
            self.segment_start.saturating_add(shift),
            self.segment_end.saturating_add(shift),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlTuple {
    /// End of stream.
    Eos,
    Punctuation(PunctuationControl),
}

impl ControlTuple {
    pub fn is_eos(&self) -> bool {
        matches!(self, ControlTuple::Eos)
    }
}

/// Anything that can travel on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamElement {
    Data(DataTuple),
    Control(ControlTuple),
}

impl StreamElement {
    pub fn eos() -> Self {
        StreamElement::Control(ControlTuple::Eos)
    }

    pub fn is_eos(&self) -> bool {
        matches!(self, StreamElement::Control(ControlTuple::Eos))
    }
}

impl From<DataTuple> for StreamElement {
    fn from(tuple: DataTuple) -> Self {
        StreamElement::Data(tuple)
    }
}

impl From<ControlTuple> for StreamElement {
    fn from(control: ControlTuple) -> Self {
        StreamElement::Control(control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_annotation() {
        let mut tuple = DataTuple::new(vec![Value::Int64(1), Value::Float64(2.0)]);
        assert!(tuple.segment_ids().is_empty());

        tuple.metadata_mut().add_segment(3);
        tuple.metadata_mut().add_segment(1);
        tuple.metadata_mut().add_segment(3);

        let ids: Vec<i64> = tuple.segment_ids().iter().copied().collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_extended_keeps_metadata() {
        let mut tuple = DataTuple::new(vec![Value::Int64(1)]);
        tuple.metadata_mut().add_segment(7);

        let extended = tuple.extended([Value::from("x")]);
        assert_eq!(extended.len(), 2);
        assert!(extended.segment_ids().contains(&7));
    }

    #[test]
    fn test_window_bounds() {
        let punct = PunctuationControl::window(3, 0, 100, 50);
        assert_eq!(punct.absolute_bounds(), (150, 250));

        let frame = PunctuationControl::frame(9, 1_000, 1_400);
        assert_eq!(frame.absolute_bounds(), (1_000, 1_400));
        assert_eq!(frame.punctuation_type, PunctuationType::Frame);
    }

    #[test]
    fn test_element_kinds() {
        assert!(StreamElement::eos().is_eos());
        let data: StreamElement = DataTuple::new(vec![]).into();
        assert!(!data.is_eos());
    }
}
