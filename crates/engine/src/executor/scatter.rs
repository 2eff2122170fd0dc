//! Scatter expansion and gathering.
//!
//! A scattered step runs once per combination of its scattered inputs. Every instance
//! gets its own binding map: unscattered inputs are shared by value, scattered ones bind
//! a single element.

use serde_json::{Map, Value};
use tracing::debug;
use weft_types::ScatterMethod;

use crate::error::{EngineError, EngineResult};

/// One invocation of a scattered step.
#[derive(Debug, Clone, PartialEq)]
pub struct ScatterInstance {
    /// Id suffix: `[i]` for dot and flat products, `[i][j]...` for nested products.
    pub suffix: String,
    pub inputs: Map<String, Value>,
}

/// Shape of the scatter, needed to gather per-instance outputs back into arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScatterShape {
    /// One flat list of `n` results.
    Flat(usize),
    /// Nested lists with one dimension per scattered input.
    Nested(Vec<usize>),
}

/// Expands `inputs` over the scattered names.
pub fn expand(
    step_id: &str,
    scatter: &[String],
    method: Option<ScatterMethod>,
    inputs: &Map<String, Value>,
) -> EngineResult<(Vec<ScatterInstance>, ScatterShape)> {
    let invalid = |message: String| EngineError::InvalidScatter {
        step: step_id.to_string(),
        message,
    };

    let method = match method {
        Some(method) => method,
        None if scatter.len() == 1 => ScatterMethod::DotProduct,
        None => return Err(invalid(format!("{} scattered inputs require an explicit scatter method", scatter.len()))),
    };

    let mut lists: Vec<&Vec<Value>> = Vec::with_capacity(scatter.len());
    for name in scatter {
        match inputs.get(name) {
            Some(Value::Array(items)) => lists.push(items),
            Some(other) => return Err(invalid(format!("scattered input '{name}' is not a list: {other}"))),
            None => return Err(invalid(format!("scattered input '{name}' is not an input of the step"))),
        }
    }

    let instances = match method {
        ScatterMethod::DotProduct => {
            let length = lists.first().map_or(0, |items| items.len());
            if let Some((name, items)) = scatter.iter().zip(&lists).find(|(_, items)| items.len() != length) {
                return Err(invalid(format!(
                    "dot product needs equal lengths: '{}' has {length} elements but '{name}' has {}",
                    scatter[0],
                    items.len()
                )));
            }
            let instances = (0..length)
                .map(|index| ScatterInstance {
                    suffix: format!("[{index}]"),
                    inputs: bind(inputs, scatter, &lists, &vec![index; lists.len()]),
                })
                .collect();
            (instances, ScatterShape::Flat(length))
        }
        ScatterMethod::FlatCrossProduct => {
            let combinations = cross_product(&lists);
            let instances: Vec<ScatterInstance> = combinations
                .iter()
                .enumerate()
                .map(|(counter, indices)| ScatterInstance {
                    suffix: format!("[{counter}]"),
                    inputs: bind(inputs, scatter, &lists, indices),
                })
                .collect();
            let count = instances.len();
            (instances, ScatterShape::Flat(count))
        }
        ScatterMethod::NestedCrossProduct => {
            let instances = cross_product(&lists)
                .iter()
                .map(|indices| ScatterInstance {
                    suffix: indices.iter().map(|index| format!("[{index}]")).collect(),
                    inputs: bind(inputs, scatter, &lists, indices),
                })
                .collect();
            (instances, ScatterShape::Nested(lists.iter().map(|items| items.len()).collect()))
        }
    };

    debug!(step_id = %step_id, instances = instances.0.len(), method = ?method, "expanded scatter");
    Ok(instances)
}

fn bind(inputs: &Map<String, Value>, scatter: &[String], lists: &[&Vec<Value>], indices: &[usize]) -> Map<String, Value> {
    let mut bound = inputs.clone();
    for ((name, items), index) in scatter.iter().zip(lists).zip(indices) {
        bound.insert(name.clone(), items[*index].clone());
    }
    bound
}

/// Index combinations in row-major order: the first list varies slowest.
fn cross_product(lists: &[&Vec<Value>]) -> Vec<Vec<usize>> {
    let mut combinations: Vec<Vec<usize>> = vec![Vec::new()];
    for items in lists {
        let mut extended = Vec::with_capacity(combinations.len() * items.len());
        for prefix in &combinations {
            for index in 0..items.len() {
                let mut combination = prefix.clone();
                combination.push(index);
                extended.push(combination);
            }
        }
        combinations = extended;
    }
    combinations
}

/// Reassembles per-instance values (in instance order) into the scatter's output shape.
pub fn gather(shape: &ScatterShape, values: Vec<Value>) -> Value {
    match shape {
        ScatterShape::Flat(_) => Value::Array(values),
        ScatterShape::Nested(dimensions) => nest(dimensions, values),
    }
}

fn nest(dimensions: &[usize], values: Vec<Value>) -> Value {
    match dimensions {
        [] | [_] => Value::Array(values),
        [_, inner @ ..] => {
            let chunk: usize = inner.iter().product();
            if chunk == 0 {
                return Value::Array(vec![Value::Array(Vec::new()); dimensions[0]]);
            }
            let mut rows = Vec::with_capacity(dimensions[0]);
            let mut remaining = values.into_iter();
            for _ in 0..dimensions[0] {
                let row: Vec<Value> = remaining.by_ref().take(chunk).collect();
                rows.push(nest(inner, row));
            }
            Value::Array(rows)
        }
    }
}
