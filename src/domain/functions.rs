// Function registry: named transform/filter/sort/reduce/option operations
//
// The catalog is a single immutable table built on first use. Unknown
// names surface as typed errors when a descriptor is resolved, not when
// the pipeline runs.
use super::error::{GatewayError, GatewayResult};
use lazy_static::lazy_static;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Transform,
    ArrayToScalar,
    FilterSeries,
    Sort,
    Options,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Category::Transform => "Transform",
            Category::ArrayToScalar => "Array to Scalar",
            Category::FilterSeries => "Filter Series",
            Category::Sort => "Sort",
            Category::Options => "Options",
        }
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Float,
    String,
    Boolean,
}

impl ParamType {
    pub fn label(self) -> &'static str {
        match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::String => "string",
            ParamType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: &'static str,
    pub param_type: ParamType,
    pub options: &'static [&'static str],
}

impl ParamDef {
    const fn new(name: &'static str, param_type: ParamType) -> Self {
        Self {
            name,
            param_type,
            options: &[],
        }
    }

    const fn with_options(
        name: &'static str,
        param_type: ParamType,
        options: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            param_type,
            options,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FuncDef {
    pub name: &'static str,
    pub short_name: Option<&'static str>,
    pub category: Category,
    pub params: Vec<ParamDef>,
    pub default_params: &'static [&'static str],
}

const AGG_OPTIONS: &[&str] = &["avg", "min", "max", "absoluteMin", "absoluteMax", "sum"];
const ORDER_OPTIONS: &[&str] = &["desc", "asc"];
const BOOL_OPTIONS: &[&str] = &["true", "false"];

fn sort_def(name: &'static str) -> FuncDef {
    FuncDef {
        name,
        short_name: None,
        category: Category::Sort,
        params: vec![ParamDef::with_options("order", ParamType::String, ORDER_OPTIONS)],
        default_params: &["desc"],
    }
}

fn to_scalar_def(name: &'static str) -> FuncDef {
    FuncDef {
        name,
        short_name: None,
        category: Category::ArrayToScalar,
        params: Vec::new(),
        default_params: &[],
    }
}

fn extraction_def(name: &'static str) -> FuncDef {
    FuncDef {
        name,
        short_name: None,
        category: Category::FilterSeries,
        params: vec![
            ParamDef::new("number", ParamType::Int),
            ParamDef::with_options("value", ParamType::String, AGG_OPTIONS),
        ],
        default_params: &["5", "avg"],
    }
}

fn option_def(name: &'static str, param: ParamDef, defaults: &'static [&'static str]) -> FuncDef {
    FuncDef {
        name,
        short_name: None,
        category: Category::Options,
        params: vec![param],
        default_params: defaults,
    }
}

lazy_static! {
    static ref FUNC_DEFS: Vec<FuncDef> = vec![
        // Transform
        FuncDef {
            name: "scale",
            short_name: None,
            category: Category::Transform,
            params: vec![ParamDef::new("factor", ParamType::Float)],
            default_params: &["100"],
        },
        FuncDef {
            name: "offset",
            short_name: None,
            category: Category::Transform,
            params: vec![ParamDef::new("delta", ParamType::Float)],
            default_params: &["100"],
        },
        FuncDef {
            name: "delta",
            short_name: None,
            category: Category::Transform,
            params: Vec::new(),
            default_params: &[],
        },
        FuncDef {
            name: "fluctuation",
            short_name: None,
            category: Category::Transform,
            params: Vec::new(),
            default_params: &[],
        },
        FuncDef {
            name: "movingAverage",
            short_name: None,
            category: Category::Transform,
            params: vec![ParamDef::new("windowSize", ParamType::Int)],
            default_params: &["10"],
        },
        // Array to Scalar
        to_scalar_def("toScalarByAvg"),
        to_scalar_def("toScalarByMax"),
        to_scalar_def("toScalarByMin"),
        to_scalar_def("toScalarBySum"),
        to_scalar_def("toScalarByMed"),
        to_scalar_def("toScalarByStd"),
        // Filter Series
        extraction_def("top"),
        extraction_def("bottom"),
        FuncDef {
            name: "exclude",
            short_name: None,
            category: Category::FilterSeries,
            params: vec![ParamDef::new("pattern", ParamType::String)],
            default_params: &[],
        },
        // Sort
        sort_def("sortByAvg"),
        sort_def("sortByMax"),
        sort_def("sortByMin"),
        sort_def("sortBySum"),
        sort_def("sortByAbsMax"),
        sort_def("sortByAbsMin"),
        // Options
        option_def(
            "maxNumPVs",
            ParamDef::new("number", ParamType::Int),
            &["100"],
        ),
        option_def(
            "binInterval",
            ParamDef::new("interval", ParamType::Int),
            &["900"],
        ),
        option_def(
            "disableAutoRaw",
            ParamDef::with_options("boolean", ParamType::Boolean, BOOL_OPTIONS),
            &["false"],
        ),
        option_def(
            "disableExtrapol",
            ParamDef::with_options("boolean", ParamType::Boolean, BOOL_OPTIONS),
            &["false"],
        ),
        option_def(
            "arrayFormat",
            ParamDef::with_options(
                "format",
                ParamType::String,
                &["timeseries", "index", "dt-space"],
            ),
            &["timeseries"],
        ),
        option_def(
            "ignoreEmptyErr",
            ParamDef::with_options("boolean", ParamType::Boolean, BOOL_OPTIONS),
            &["false"],
        ),
        option_def(
            "liveOnly",
            ParamDef::with_options("boolean", ParamType::Boolean, BOOL_OPTIONS),
            &["false"],
        ),
    ];

    static ref FUNC_INDEX: HashMap<&'static str, &'static FuncDef> = {
        let mut index = HashMap::new();
        for def in FUNC_DEFS.iter() {
            index.insert(def.name, def);
            if let Some(short) = def.short_name {
                index.insert(short, def);
            }
        }
        index
    };
}

const CATEGORY_ORDER: &[Category] = &[
    Category::Transform,
    Category::ArrayToScalar,
    Category::FilterSeries,
    Category::Sort,
    Category::Options,
];

pub fn get_func_def(name: &str) -> Option<&'static FuncDef> {
    FUNC_INDEX.get(name).copied()
}

pub fn get_categories() -> Vec<(Category, Vec<&'static FuncDef>)> {
    CATEGORY_ORDER
        .iter()
        .map(|&category| {
            let defs = FUNC_DEFS
                .iter()
                .filter(|def| def.category == category)
                .collect();
            (category, defs)
        })
        .collect()
}

/// A registry function bound to concrete parameter values. Parameters are
/// stored as strings; numeric coercion happens when the function is
/// compiled for application.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    pub def: &'static FuncDef,
    pub params: Vec<String>,
}

impl FunctionDescriptor {
    pub fn text(&self) -> String {
        format!("{}({})", self.def.name, self.params.join(", "))
    }

    pub fn param(&self, index: usize) -> &str {
        self.params.get(index).map(String::as_str).unwrap_or("")
    }
}

/// Create a descriptor from a def; omitted params clone the defaults.
pub fn create_func_descriptor(
    def: &'static FuncDef,
    params: Option<Vec<String>>,
) -> FunctionDescriptor {
    let params = params
        .unwrap_or_else(|| def.default_params.iter().map(|p| p.to_string()).collect());
    FunctionDescriptor { def, params }
}

/// Resolve a function by name, with a typed error for unknown names.
pub fn resolve_func_descriptor(
    name: &str,
    params: Option<Vec<String>>,
) -> GatewayResult<FunctionDescriptor> {
    let def = get_func_def(name).ok_or_else(|| GatewayError::UnknownFunction(name.to_string()))?;
    Ok(create_func_descriptor(def, params))
}

/// Stable filter of descriptors whose category is in `categories`.
pub fn pick_func_defs_from_categories<'a>(
    descriptors: &'a [FunctionDescriptor],
    categories: &[Category],
) -> Vec<&'a FunctionDescriptor> {
    descriptors
        .iter()
        .filter(|d| categories.contains(&d.def.category))
        .collect()
}

/// Fold Options-category descriptors into a flat name -> value map;
/// later duplicates overwrite earlier ones.
pub fn get_options(descriptors: &[FunctionDescriptor]) -> HashMap<String, String> {
    pick_func_defs_from_categories(descriptors, &[Category::Options])
        .into_iter()
        .map(|d| (d.def.name.to_string(), d.param(0).to_string()))
        .collect()
}

/// Reduction applied per-sample to a waveform's array value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarReducer {
    Avg,
    Max,
    Min,
    Sum,
    Median,
    Std,
}

impl ScalarReducer {
    pub fn reduce(self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return f64::NAN;
        }

        let len = values.len() as f64;
        match self {
            ScalarReducer::Avg => values.iter().sum::<f64>() / len,
            ScalarReducer::Max => values.iter().copied().fold(f64::MIN, f64::max),
            ScalarReducer::Min => values.iter().copied().fold(f64::MAX, f64::min),
            ScalarReducer::Sum => values.iter().sum(),
            ScalarReducer::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            ScalarReducer::Std => {
                let mean = values.iter().sum::<f64>() / len;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / len;
                variance.sqrt()
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ToScalarFunc {
    pub reducer: ScalarReducer,
    pub label: &'static str,
}

/// Map Array-to-Scalar descriptors to their reducers and display labels.
pub fn get_to_scalar_funcs(descriptors: &[FunctionDescriptor]) -> Vec<ToScalarFunc> {
    pick_func_defs_from_categories(descriptors, &[Category::ArrayToScalar])
        .into_iter()
        .filter_map(|d| {
            let (reducer, label) = match d.def.name {
                "toScalarByAvg" => (ScalarReducer::Avg, "avg"),
                "toScalarByMax" => (ScalarReducer::Max, "max"),
                "toScalarByMin" => (ScalarReducer::Min, "min"),
                "toScalarBySum" => (ScalarReducer::Sum, "sum"),
                "toScalarByMed" => (ScalarReducer::Median, "median"),
                "toScalarByStd" => (ScalarReducer::Std, "std"),
                _ => return None,
            };
            Some(ToScalarFunc { reducer, label })
        })
        .collect()
}
