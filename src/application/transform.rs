// Series transform engine
//
// Descriptors are compiled into `BoundFunction`s up front (numeric
// parameters parsed, regexes built), then applied as a sequential fold
// over the frame list. The fold short-circuits on the first error.
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::frame::{FieldValues, Frame};
use crate::domain::functions::{Category, FunctionDescriptor, ParamType, pick_func_defs_from_categories};
use regex::Regex;

/// Aggregate used by top/bottom extraction and the sort functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Avg,
    Min,
    Max,
    Sum,
    AbsoluteMin,
    AbsoluteMax,
}

impl AggFunc {
    fn parse(func: &str, param: &str) -> GatewayResult<Self> {
        match param {
            "avg" => Ok(AggFunc::Avg),
            "min" => Ok(AggFunc::Min),
            "max" => Ok(AggFunc::Max),
            "sum" => Ok(AggFunc::Sum),
            "absoluteMin" => Ok(AggFunc::AbsoluteMin),
            "absoluteMax" => Ok(AggFunc::AbsoluteMax),
            _ => Err(GatewayError::InvalidParameter {
                func: func.to_string(),
                param: param.to_string(),
            }),
        }
    }

    /// absoluteMin/absoluteMax report the absolute value of the selected
    /// element, not its signed value.
    pub fn compute(self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return f64::NAN;
        }

        match self {
            AggFunc::Avg => values.iter().sum::<f64>() / values.len() as f64,
            AggFunc::Min => values.iter().copied().fold(f64::MAX, f64::min),
            AggFunc::Max => values.iter().copied().fold(f64::MIN, f64::max),
            AggFunc::Sum => values.iter().sum(),
            AggFunc::AbsoluteMin => values.iter().map(|v| v.abs()).fold(f64::MAX, f64::min),
            AggFunc::AbsoluteMax => values.iter().map(|v| v.abs()).fold(f64::MIN, f64::max),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Desc,
    Asc,
}

/// A registry function compiled for application.
#[derive(Debug)]
pub enum BoundFunction {
    Scale(f64),
    Offset(f64),
    Delta,
    Fluctuation,
    MovingAverage(usize),
    Top(usize, AggFunc),
    Bottom(usize, AggFunc),
    Exclude(Regex),
    SortBy(AggFunc, SortOrder),
}

/// Compile a descriptor, coercing numeric parameters in declaration order.
pub fn bind_function(descriptor: &FunctionDescriptor) -> GatewayResult<BoundFunction> {
    let name = descriptor.def.name;

    match name {
        "scale" => Ok(BoundFunction::Scale(parse_float(descriptor, 0)?)),
        "offset" => Ok(BoundFunction::Offset(parse_float(descriptor, 0)?)),
        "delta" => Ok(BoundFunction::Delta),
        "fluctuation" => Ok(BoundFunction::Fluctuation),
        "movingAverage" => Ok(BoundFunction::MovingAverage(parse_int(descriptor, 0)?)),
        "top" => Ok(BoundFunction::Top(
            parse_int(descriptor, 0)?,
            AggFunc::parse(name, descriptor.param(1))?,
        )),
        "bottom" => Ok(BoundFunction::Bottom(
            parse_int(descriptor, 0)?,
            AggFunc::parse(name, descriptor.param(1))?,
        )),
        "exclude" => {
            let pattern = descriptor.param(0);
            let regex = Regex::new(pattern).map_err(|_| GatewayError::InvalidParameter {
                func: name.to_string(),
                param: pattern.to_string(),
            })?;
            Ok(BoundFunction::Exclude(regex))
        }
        "sortByAvg" => sort_by(descriptor, AggFunc::Avg),
        "sortByMax" => sort_by(descriptor, AggFunc::Max),
        "sortByMin" => sort_by(descriptor, AggFunc::Min),
        "sortBySum" => sort_by(descriptor, AggFunc::Sum),
        "sortByAbsMax" => sort_by(descriptor, AggFunc::AbsoluteMax),
        "sortByAbsMin" => sort_by(descriptor, AggFunc::AbsoluteMin),
        _ => Err(GatewayError::UnknownFunction(name.to_string())),
    }
}

fn sort_by(descriptor: &FunctionDescriptor, agg: AggFunc) -> GatewayResult<BoundFunction> {
    let order = if descriptor.param(0) == "asc" {
        SortOrder::Asc
    } else {
        SortOrder::Desc
    };
    Ok(BoundFunction::SortBy(agg, order))
}

fn parse_float(descriptor: &FunctionDescriptor, index: usize) -> GatewayResult<f64> {
    debug_assert!(matches!(
        descriptor.def.params[index].param_type,
        ParamType::Float | ParamType::Int
    ));
    let param = descriptor.param(index);
    param
        .parse::<f64>()
        .map_err(|_| GatewayError::InvalidParameter {
            func: descriptor.def.name.to_string(),
            param: param.to_string(),
        })
}

fn parse_int(descriptor: &FunctionDescriptor, index: usize) -> GatewayResult<usize> {
    let param = descriptor.param(index);
    param
        .parse::<usize>()
        .map_err(|_| GatewayError::InvalidParameter {
            func: descriptor.def.name.to_string(),
            param: param.to_string(),
        })
}

/// Apply the data-transforming descriptors to the frame list in order.
/// Options and Array-to-Scalar functions are consumed elsewhere.
pub fn apply_function_defs(
    descriptors: &[FunctionDescriptor],
    frames: Vec<Frame>,
) -> GatewayResult<Vec<Frame>> {
    let applicable = pick_func_defs_from_categories(
        descriptors,
        &[Category::Transform, Category::FilterSeries, Category::Sort],
    );

    let mut frames = frames;
    for descriptor in applicable {
        let function = bind_function(descriptor)?;
        tracing::debug!("applying {} to {} frames", descriptor.text(), frames.len());
        frames = function.apply(frames);
    }

    Ok(frames)
}

impl BoundFunction {
    pub fn apply(&self, frames: Vec<Frame>) -> Vec<Frame> {
        match self {
            BoundFunction::Scale(factor) => {
                let factor = *factor;
                map_frames(frames, move |times, values| {
                    (times.to_vec(), values.iter().map(|v| v * factor).collect())
                })
            }
            BoundFunction::Offset(delta) => {
                let delta = *delta;
                map_frames(frames, move |times, values| {
                    (times.to_vec(), values.iter().map(|v| v + delta).collect())
                })
            }
            BoundFunction::Delta => map_frames(frames, |times, values| {
                let deltas = values.windows(2).map(|w| w[1] - w[0]).collect();
                (times.iter().skip(1).copied().collect(), deltas)
            }),
            BoundFunction::Fluctuation => map_frames(frames, |times, values| {
                let first = values.first().copied().unwrap_or(0.0);
                (times.to_vec(), values.iter().map(|v| v - first).collect())
            }),
            BoundFunction::MovingAverage(window) => {
                let window = *window;
                map_frames(frames, move |times, values| {
                    if values.len() < window {
                        return (times.to_vec(), values.to_vec());
                    }

                    let averaged = (0..values.len())
                        .map(|i| {
                            let start = (i + 1).saturating_sub(window);
                            let slice = &values[start..=i];
                            slice.iter().sum::<f64>() / slice.len() as f64
                        })
                        .collect();
                    (times.to_vec(), averaged)
                })
            }
            BoundFunction::Exclude(regex) => frames
                .into_iter()
                .filter(|frame| !regex.is_match(frame_display_label(frame)))
                .collect(),
            BoundFunction::Top(n, agg) => {
                let mut sorted = sort_frames_ascending(frames, *agg);
                let n = (*n).min(sorted.len());
                let mut picked = sorted.split_off(sorted.len() - n);
                picked.reverse();
                picked
            }
            BoundFunction::Bottom(n, agg) => {
                let mut sorted = sort_frames_ascending(frames, *agg);
                sorted.truncate(*n);
                sorted
            }
            BoundFunction::SortBy(agg, order) => {
                let mut sorted = sort_frames_ascending(frames, *agg);
                if *order == SortOrder::Desc {
                    sorted.reverse();
                }
                sorted
            }
        }
    }
}

/// Fan a per-field-pair transform out over every value field of every
/// frame, keeping all other field metadata. Frames without a leading
/// time field pass through untouched.
fn map_frames<F>(frames: Vec<Frame>, transform: F) -> Vec<Frame>
where
    F: Fn(&[i64], &[f64]) -> (Vec<i64>, Vec<f64>),
{
    frames
        .into_iter()
        .map(|mut frame| {
            let Some(times) = frame.times().map(<[i64]>::to_vec) else {
                return frame;
            };

            let mut new_times: Option<Vec<i64>> = None;
            for field in &mut frame.fields[1..] {
                if let FieldValues::Number(values) = &field.values {
                    let (t, v) = transform(&times, values);
                    field.values = FieldValues::Number(v);
                    new_times.get_or_insert(t);
                }
            }

            if let Some(t) = new_times {
                frame.fields[0].values = FieldValues::Time(t);
            }
            frame
        })
        .collect()
}

/// Label a frame is known by when filtering and sorting: the first value
/// field's display label, falling back to the frame name.
fn frame_display_label(frame: &Frame) -> &str {
    frame
        .fields
        .iter()
        .find(|f| !f.is_time())
        .map(|f| f.display_label())
        .or(frame.name.as_deref())
        .unwrap_or("")
}

fn frame_aggregate(frame: &Frame, agg: AggFunc) -> f64 {
    let values = frame.fields.iter().find_map(|f| match &f.values {
        FieldValues::Number(values) => Some(values.as_slice()),
        FieldValues::Time(_) => None,
    });
    agg.compute(values.unwrap_or(&[]))
}

fn sort_frames_ascending(frames: Vec<Frame>, agg: AggFunc) -> Vec<Frame> {
    let mut keyed: Vec<(f64, Frame)> = frames
        .into_iter()
        .map(|frame| (frame_aggregate(&frame, agg), frame))
        .collect();
    // Stable, so equal aggregates keep their input order.
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
    keyed.into_iter().map(|(_, frame)| frame).collect()
}
