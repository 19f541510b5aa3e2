// Columnar frame domain model
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValues {
    Time(Vec<i64>),
    Number(Vec<f64>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            FieldValues::Time(v) => v.len(),
            FieldValues::Number(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub values: FieldValues,
}

impl Field {
    pub fn time(values: Vec<i64>) -> Self {
        Self {
            name: "time".to_string(),
            display_name: None,
            values: FieldValues::Time(values),
        }
    }

    pub fn number(name: String, values: Vec<f64>) -> Self {
        Self {
            name,
            display_name: None,
            values: FieldValues::Number(values),
        }
    }

    pub fn number_with_display(name: String, display_name: String, values: Vec<f64>) -> Self {
        Self {
            name,
            display_name: Some(display_name),
            values: FieldValues::Number(values),
        }
    }

    /// Label used when the series is plotted, filtered or renamed.
    pub fn display_label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn is_time(&self) -> bool {
        matches!(self.values, FieldValues::Time(_))
    }
}

/// One row of a time-led frame, used by the stream merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub time: i64,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Frame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    pub fields: Vec<Field>,
}

impl Frame {
    pub fn new(name: Option<String>, ref_id: Option<String>, fields: Vec<Field>) -> Self {
        Self {
            name,
            ref_id,
            fields,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Row count, following the first field.
    pub fn len(&self) -> usize {
        self.fields.first().map(|f| f.values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn times(&self) -> Option<&[i64]> {
        match self.fields.first() {
            Some(Field {
                values: FieldValues::Time(times),
                ..
            }) => Some(times),
            _ => None,
        }
    }

    /// Rows of a time-led frame. Frames without a leading time field
    /// (e.g. index-layout waveforms) yield nothing.
    pub fn rows(&self) -> Vec<Row> {
        let Some(times) = self.times() else {
            return Vec::new();
        };

        times
            .iter()
            .enumerate()
            .map(|(i, &time)| {
                let values = self.fields[1..]
                    .iter()
                    .filter_map(|f| match &f.values {
                        FieldValues::Number(v) => v.get(i).copied(),
                        FieldValues::Time(_) => None,
                    })
                    .collect();
                Row { time, values }
            })
            .collect()
    }

    /// Append a synthetic trailing row at `to_ms` duplicating the last row.
    pub fn extrapolate_to(&mut self, to_ms: i64) {
        if self.is_empty() {
            return;
        }

        for field in &mut self.fields {
            match &mut field.values {
                FieldValues::Time(times) => times.push(to_ms),
                FieldValues::Number(values) => {
                    if let Some(&last) = values.last() {
                        values.push(last);
                    }
                }
            }
        }
    }
}

/// Fixed-capacity append-at-tail frame, owned by one stream subscription.
/// Oldest rows are evicted once the capacity is reached.
#[derive(Debug)]
pub struct CircularFrame {
    capacity: usize,
    name: Option<String>,
    ref_id: Option<String>,
    value_names: Vec<(String, Option<String>)>,
    times: VecDeque<i64>,
    values: Vec<VecDeque<f64>>,
}

impl CircularFrame {
    /// Seed a ring from the first poll's frame. Returns `None` for frames
    /// that are not time-led.
    pub fn from_frame(frame: &Frame, capacity: Option<usize>) -> Option<Self> {
        frame.times()?;

        let rows = frame.rows();
        let capacity = capacity.unwrap_or(rows.len()).max(1);
        let value_names = frame.fields[1..]
            .iter()
            .filter(|f| !f.is_time())
            .map(|f| (f.name.clone(), f.display_name.clone()))
            .collect::<Vec<_>>();

        let mut ring = Self {
            capacity,
            name: frame.name.clone(),
            ref_id: frame.ref_id.clone(),
            values: vec![VecDeque::with_capacity(capacity); value_names.len()],
            value_names,
            times: VecDeque::with_capacity(capacity),
        };

        for row in rows {
            ring.push_row(row);
        }

        Some(ring)
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn last_time(&self) -> Option<i64> {
        self.times.back().copied()
    }

    pub fn push_row(&mut self, row: Row) {
        if self.times.len() == self.capacity {
            self.times.pop_front();
            for column in &mut self.values {
                column.pop_front();
            }
        }

        self.times.push_back(row.time);
        for (column, value) in self.values.iter_mut().zip(row.values) {
            column.push_back(value);
        }
    }

    /// Snapshot the ring as a regular frame for emission.
    pub fn to_frame(&self) -> Frame {
        let mut fields = vec![Field::time(self.times.iter().copied().collect())];
        for ((name, display_name), column) in self.value_names.iter().zip(&self.values) {
            fields.push(Field {
                name: name.clone(),
                display_name: display_name.clone(),
                values: FieldValues::Number(column.iter().copied().collect()),
            });
        }

        Frame::new(self.name.clone(), self.ref_id.clone(), fields)
    }
}
