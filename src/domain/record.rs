// Archive records, the typed form of archiver retrieval responses
#[derive(Debug, Clone)]
pub struct RecordMeta {
    pub name: String,
    pub waveform: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Scalar(f64),
    Array(Vec<f64>),
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub millis: i64,
    pub value: SampleValue,
}

/// One PV's worth of samples from a single retrieval request.
#[derive(Debug, Clone)]
pub struct ArchiveRecord {
    pub meta: RecordMeta,
    pub samples: Vec<Sample>,
}

impl ArchiveRecord {
    /// Waveform records must carry array samples throughout to be shaped
    /// into columns; anything else is treated as unusable.
    pub fn is_number_array(&self) -> bool {
        self.meta.waveform
            && self
                .samples
                .first()
                .is_some_and(|s| matches!(s.value, SampleValue::Array(_)))
    }
}
