// Archiver response parsing into columnar frames
//
// Scalar records become one time/value pair. Waveform records are shaped
// by the arrayFormat option (timeseries, index or dt-space), unless an
// Array-to-Scalar function is present, in which case each reducer yields
// its own scalar series. Raw-range queries get one extrapolated trailing
// row at the query's `to` boundary.
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::frame::{Field, Frame};
use crate::domain::functions::{ToScalarFunc, get_to_scalar_funcs};
use crate::domain::record::{ArchiveRecord, SampleValue};
use crate::domain::target::TargetQuery;
use chrono::{TimeZone, Utc};

/// Parse the per-URL record batches of one target into frames.
pub fn parse_response(
    batches: Vec<Vec<ArchiveRecord>>,
    target: &TargetQuery,
) -> GatewayResult<Vec<Frame>> {
    let to_scalar_funcs = get_to_scalar_funcs(&target.functions);
    let mut frames = Vec::new();

    for batch in batches {
        for record in batch {
            if record.samples.is_empty() {
                if target.option_enabled("ignoreEmptyErr") {
                    frames.push(empty_scalar_frame(&record, target));
                    continue;
                }
                return Err(GatewayError::EmptyResponse(record.meta.name));
            }

            if record.meta.waveform {
                if to_scalar_funcs.is_empty() {
                    frames.push(parse_array_record(&record, target));
                } else {
                    frames.extend(parse_array_record_to_scalar(
                        &record,
                        &to_scalar_funcs,
                        target,
                    ));
                }
            } else {
                frames.push(parse_scalar_record(&record, target));
            }
        }
    }

    // Binned operators get a final sample from the archiver; raw ranges
    // may stop short of `to`, so pad them with the last known row.
    let binned = target.operator != "raw" && !target.interval.is_empty();
    if !binned && !target.option_enabled("disableExtrapol") {
        let to_ms = target.to.timestamp_millis();
        for frame in &mut frames {
            frame.extrapolate_to(to_ms);
        }
    }

    Ok(frames)
}

fn empty_scalar_frame(record: &ArchiveRecord, target: &TargetQuery) -> Frame {
    Frame::new(
        Some(record.meta.name.clone()),
        Some(target.ref_id.clone()),
        vec![
            Field::time(Vec::new()),
            Field::number_with_display(
                "value".to_string(),
                record.meta.name.clone(),
                Vec::new(),
            ),
        ],
    )
}

fn parse_scalar_record(record: &ArchiveRecord, target: &TargetQuery) -> Frame {
    let mut times = Vec::with_capacity(record.samples.len());
    let mut values = Vec::with_capacity(record.samples.len());
    for sample in &record.samples {
        if let SampleValue::Scalar(v) = sample.value {
            times.push(sample.millis);
            values.push(v);
        }
    }

    Frame::new(
        Some(record.meta.name.clone()),
        Some(target.ref_id.clone()),
        vec![
            Field::time(times),
            Field::number_with_display("value".to_string(), record.meta.name.clone(), values),
        ],
    )
}

fn parse_array_record(record: &ArchiveRecord, target: &TargetQuery) -> Frame {
    if !record.is_number_array() {
        return Frame::empty();
    }

    let fields = match target.option("arrayFormat") {
        Some("dt-space") => make_dt_space_fields(record),
        Some("index") => make_index_fields(record),
        _ => make_timeseries_fields(record),
    };

    if fields.is_empty() {
        return Frame::empty();
    }

    Frame::new(
        Some(record.meta.name.clone()),
        Some(target.ref_id.clone()),
        fields,
    )
}

fn sample_arrays(record: &ArchiveRecord) -> Vec<(i64, &[f64])> {
    record
        .samples
        .iter()
        .filter_map(|s| match &s.value {
            SampleValue::Array(values) => Some((s.millis, values.as_slice())),
            SampleValue::Scalar(_) => None,
        })
        .collect()
}

/// One time column plus one value column per array index. Ragged arrays
/// are transposed as-is: a column only holds the samples long enough to
/// reach its index.
fn make_timeseries_fields(record: &ArchiveRecord) -> Vec<Field> {
    let samples = sample_arrays(record);
    let times: Vec<i64> = samples.iter().map(|(millis, _)| *millis).collect();
    let max_len = samples.iter().map(|(_, v)| v.len()).max().unwrap_or(0);

    let mut fields = vec![Field::time(times)];
    for i in 0..max_len {
        let column: Vec<f64> = samples
            .iter()
            .filter_map(|(_, values)| values.get(i).copied())
            .collect();
        fields.push(Field::number(format!("{}[{}]", record.meta.name, i), column));
    }

    fields
}

/// One numeric index column sized to the first sample, then one column
/// per timestamp named by its ISO-8601 time. Longer samples are
/// truncated to the first sample's length.
fn make_index_fields(record: &ArchiveRecord) -> Vec<Field> {
    let samples = sample_arrays(record);
    let Some((_, first)) = samples.first() else {
        return Vec::new();
    };

    let len = first.len();
    let indexes: Vec<f64> = (0..len).map(|i| i as f64).collect();
    let mut fields = vec![Field::number("index".to_string(), indexes)];

    for (millis, values) in &samples {
        let name = match Utc.timestamp_millis_opt(*millis).single() {
            Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            None => millis.to_string(),
        };
        let values = if values.len() >= len {
            values[..len].to_vec()
        } else {
            values.to_vec()
        };
        fields.push(Field::number(name, values));
    }

    fields
}

/// A single flattened time/value pair: each array element becomes its own
/// sub-sample one millisecond after the previous.
fn make_dt_space_fields(record: &ArchiveRecord) -> Vec<Field> {
    let samples = sample_arrays(record);
    let mut times = Vec::new();
    let mut values = Vec::new();

    for (millis, array) in samples {
        for (offset, value) in array.iter().enumerate() {
            times.push(millis + offset as i64);
            values.push(*value);
        }
    }

    vec![
        Field::time(times),
        Field::number(record.meta.name.clone(), values),
    ]
}

/// One scalar series per Array-to-Scalar reducer, labelled with the
/// reducer name.
fn parse_array_record_to_scalar(
    record: &ArchiveRecord,
    funcs: &[ToScalarFunc],
    target: &TargetQuery,
) -> Vec<Frame> {
    if !record.is_number_array() {
        return vec![Frame::empty()];
    }

    let samples = sample_arrays(record);
    let times: Vec<i64> = samples.iter().map(|(millis, _)| *millis).collect();

    funcs
        .iter()
        .map(|func| {
            let values: Vec<f64> = samples
                .iter()
                .map(|(_, array)| func.reducer.reduce(array))
                .collect();

            Frame::new(
                Some(record.meta.name.clone()),
                Some(target.ref_id.clone()),
                vec![
                    Field::time(times.clone()),
                    Field::number_with_display(
                        "value".to_string(),
                        format!("{} ({})", record.meta.name, func.label),
                        values,
                    ),
                ],
            )
        })
        .collect()
}
