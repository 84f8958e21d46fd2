//! Activation functions and their per-layer configuration.
//!
//! An activation configuration is a space-separated list of names, one per hidden
//! layer (the last name repeats for deeper layers), plus sub-options written as
//! `<name>_<option>=<value>`. Options attach to a name, so every occurrence of a
//! repeated name shares them.

use crate::error::{MlError, Result};
use candle_core::Tensor;
use std::collections::BTreeMap;
use std::fmt;

/// Names accepted in activation lists, canonical names first.
pub const ACTIVATION_NAMES: &[&str] = &["relu", "relu6", "sigmoid", "tanh", "leaky_relu", "leacky_relu"];

const DEFAULT_NEGATIVE_SLOPE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Relu,
    Relu6,
    Sigmoid,
    Tanh,
    LeakyRelu { negative_slope: f64 },
}

impl Activation {
    pub fn apply(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Relu => xs.relu(),
            Self::Relu6 => xs.relu()?.minimum(6f32),
            Self::Sigmoid => candle_nn::ops::sigmoid(xs),
            Self::Tanh => xs.tanh(),
            Self::LeakyRelu { negative_slope } => candle_nn::ops::leaky_relu(xs, *negative_slope),
        }
    }

    /// Options each activation accepts.
    fn allowed_options(name: &str) -> &'static [&'static str] {
        match name {
            "relu" | "relu6" => &["inplace"],
            "leaky_relu" | "leacky_relu" => &["inplace", "negative_slope"],
            _ => &[],
        }
    }

    fn build(name: &str, options: &BTreeMap<&str, &str>) -> Result<Self> {
        for (option, value) in options {
            if !Self::allowed_options(name).contains(option) {
                return Err(MlError::config(format!(
                    "activation '{name}' has no option '{option}'"
                )));
            }
            if *option == "inplace" {
                value.parse::<bool>().map_err(|_| {
                    MlError::config(format!("{name}_inplace expects true or false, got '{value}'"))
                })?;
            }
        }

        let activation = match name {
            "relu" => Self::Relu,
            "relu6" => Self::Relu6,
            "sigmoid" => Self::Sigmoid,
            "tanh" => Self::Tanh,
            "leaky_relu" | "leacky_relu" => {
                let negative_slope = match options.get("negative_slope") {
                    Some(value) => value.parse::<f64>().map_err(|_| {
                        MlError::config(format!(
                            "{name}_negative_slope expects a number, got '{value}'"
                        ))
                    })?,
                    None => DEFAULT_NEGATIVE_SLOPE,
                };
                Self::LeakyRelu { negative_slope }
            }
            other => return Err(MlError::not_found("activation", other)),
        };
        Ok(activation)
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relu => f.write_str("relu"),
            Self::Relu6 => f.write_str("relu6"),
            Self::Sigmoid => f.write_str("sigmoid"),
            Self::Tanh => f.write_str("tanh"),
            Self::LeakyRelu { negative_slope } => write!(f, "leaky_relu({negative_slope})"),
        }
    }
}

/// Activations for the hidden layers of one network.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivationPlan {
    Single(Activation),
    PerLayer(Vec<Activation>),
}

impl Default for ActivationPlan {
    fn default() -> Self {
        Self::Single(Activation::Relu)
    }
}

impl ActivationPlan {
    /// Parse a space-separated activation list with `<name>_<option>` sub-options.
    pub fn parse(spec: &str, options: &BTreeMap<String, String>) -> Result<Self> {
        let names: Vec<&str> = spec.split_whitespace().collect();
        if names.is_empty() {
            return Err(MlError::config("activation list is empty"));
        }
        for name in &names {
            if !ACTIVATION_NAMES.contains(name) {
                return Err(MlError::not_found("activation", *name));
            }
        }

        let mut per_name: BTreeMap<&str, BTreeMap<&str, &str>> = BTreeMap::new();
        for (key, value) in options {
            let owner = names
                .iter()
                .filter(|name| {
                    key.strip_prefix(**name)
                        .and_then(|rest| rest.strip_prefix('_'))
                        .is_some_and(|opt| Activation::allowed_options(name).contains(&opt))
                })
                .max_by_key(|name| name.len())
                .ok_or_else(|| {
                    MlError::config(format!("unrecognized activation option '{key}'"))
                })?;
            let option = &key[owner.len() + 1..];
            per_name
                .entry(*owner)
                .or_default()
                .insert(option, value.as_str());
        }

        let empty = BTreeMap::new();
        let activations = names
            .iter()
            .map(|name| Activation::build(name, per_name.get(name).unwrap_or(&empty)))
            .collect::<Result<Vec<_>>>()?;

        Ok(match activations.as_slice() {
            [single] => Self::Single(*single),
            _ => Self::PerLayer(activations),
        })
    }

    /// Activation of hidden layer `index`; the last entry covers deeper layers.
    pub fn for_layer(&self, index: usize) -> Activation {
        match self {
            Self::Single(activation) => *activation,
            Self::PerLayer(list) => list
                .get(index)
                .or_else(|| list.last())
                .copied()
                .unwrap_or(Activation::Relu),
        }
    }
}
