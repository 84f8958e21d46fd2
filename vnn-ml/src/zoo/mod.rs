//! Network registry. Maps registry keys to trainable model instances.
//!
//! A key names an architecture, a parameterization family and, for ResNet and VGG,
//! a depth: `mnist_base_vnn`, `cifar10_base_dropout`, `resnet_classic_50`,
//! `vgg_vnn_16`. Every key resolves to an [`Architecture`] × [`Parameterization`]
//! pair checked exhaustively, so adding a variant is a compile error until every
//! builder handles it.

pub mod base;
pub mod resnet;
pub mod vgg;

use crate::context::ForwardContext;
use crate::error::{MlError, Result};
use crate::layers::{ActivationPlan, LayerFactory, Parameterization};
use crate::network::CandleNetwork;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use resnet::ResNetDepth;
pub use vgg::VggDepth;

/// Network topology, independent of how its weights are parameterized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    MnistBase,
    Cifar10Base,
    ResNet(ResNetDepth),
    Vgg(VggDepth),
}

impl Architecture {
    pub fn all() -> Vec<Architecture> {
        let mut all = vec![Self::MnistBase, Self::Cifar10Base];
        all.extend(ResNetDepth::ALL.into_iter().map(Self::ResNet));
        all.extend(VggDepth::ALL.into_iter().map(Self::Vgg));
        all
    }
}

/// A fully resolved registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkKind {
    pub architecture: Architecture,
    pub parameterization: Parameterization,
}

impl NetworkKind {
    pub fn new(architecture: Architecture, parameterization: Parameterization) -> Self {
        Self {
            architecture,
            parameterization,
        }
    }

    /// Every registry key, in listing order.
    pub fn all() -> Vec<NetworkKind> {
        Architecture::all()
            .into_iter()
            .flat_map(|architecture| {
                Parameterization::ALL
                    .into_iter()
                    .map(move |parameterization| Self::new(architecture, parameterization))
            })
            .collect()
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.parameterization.token();
        match self.architecture {
            Architecture::MnistBase => write!(f, "mnist_base_{p}"),
            Architecture::Cifar10Base => write!(f, "cifar10_base_{p}"),
            Architecture::ResNet(depth) => write!(f, "resnet_{p}_{}", depth.layers()),
            Architecture::Vgg(depth) => write!(f, "vgg_{p}_{}", depth.layers()),
        }
    }
}

impl FromStr for NetworkKind {
    type Err = MlError;

    fn from_str(key: &str) -> std::result::Result<Self, Self::Err> {
        let unknown = || MlError::not_found("network", key);
        let family = |token: &str| {
            Parameterization::ALL
                .into_iter()
                .find(|p| p.token() == token)
                .ok_or_else(unknown)
        };
        let depth = |token: &str| token.parse::<usize>().map_err(|_| unknown());

        let parts: Vec<&str> = key.split('_').collect();
        let kind = match parts.as_slice() {
            ["mnist", "base", p] => Self::new(Architecture::MnistBase, family(*p)?),
            ["cifar10", "base", p] => Self::new(Architecture::Cifar10Base, family(*p)?),
            ["resnet", p, d] => {
                let depth = ResNetDepth::from_layers(depth(*d)?).ok_or_else(unknown)?;
                Self::new(Architecture::ResNet(depth), family(*p)?)
            }
            ["vgg", p, d] => {
                let depth = VggDepth::from_layers(depth(*d)?).ok_or_else(unknown)?;
                Self::new(Architecture::Vgg(depth), family(*p)?)
            }
            _ => return Err(unknown()),
        };
        Ok(kind)
    }
}

/// Shape of one input example and the number of target classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub classes: usize,
}

fn default_dropout() -> f32 {
    0.2
}

fn default_initial_rho() -> f64 {
    -5.0
}

fn default_stochasticity() -> f64 {
    1.0
}

/// Architecture options forwarded from `train`/`evaluate` to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkOptions {
    /// Space-separated activation names, one per hidden layer.
    #[serde(default)]
    pub activation: Option<String>,
    /// `<name>_<option>` → value.
    #[serde(default)]
    pub activation_options: BTreeMap<String, String>,
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    #[serde(default = "default_initial_rho")]
    pub initial_rho: f64,
    /// Stochasticity used by training steps when no annealing is configured.
    #[serde(default = "default_stochasticity")]
    pub stochasticity: f64,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            activation: None,
            activation_options: BTreeMap::new(),
            dropout: default_dropout(),
            initial_rho: default_initial_rho(),
            stochasticity: default_stochasticity(),
        }
    }
}

impl NetworkOptions {
    pub fn activation_plan(&self) -> Result<ActivationPlan> {
        match &self.activation {
            Some(spec) => ActivationPlan::parse(spec, &self.activation_options),
            None if self.activation_options.is_empty() => Ok(ActivationPlan::default()),
            None => Err(MlError::config(
                "activation options given without an activation list",
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(MlError::config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if !self.stochasticity.is_finite() || !self.initial_rho.is_finite() {
            return Err(MlError::config("stochasticity and initial_rho must be finite"));
        }
        Ok(())
    }
}

/// Logits of one forward pass and, for a variational head, its predictive variance.
#[derive(Debug, Clone)]
pub struct BackboneOutput {
    pub logits: Tensor,
    pub variance: Option<Tensor>,
}

/// The layers of one network, without optimizer or loss.
pub trait Backbone {
    fn forward(&self, xs: &Tensor, ctx: &ForwardContext) -> candle_core::Result<BackboneOutput>;
}

/// Construct the layers for `kind` with their variables registered in `vb`.
pub fn build_backbone(
    kind: NetworkKind,
    input: InputShape,
    options: &NetworkOptions,
    vb: VarBuilder,
) -> Result<Box<dyn Backbone>> {
    options.validate()?;
    let activations = options.activation_plan()?;
    let factory = LayerFactory::new(kind.parameterization, options.dropout, options.initial_rho);

    let backbone: Box<dyn Backbone> = match kind.architecture {
        Architecture::MnistBase => Box::new(base::BaseNet::new(
            base::BaseWidths::MNIST,
            input,
            factory,
            activations,
            vb,
        )?),
        Architecture::Cifar10Base => Box::new(base::BaseNet::new(
            base::BaseWidths::CIFAR10,
            input,
            factory,
            activations,
            vb,
        )?),
        Architecture::ResNet(depth) => {
            Box::new(resnet::ResNet::new(depth, input, factory, activations, vb)?)
        }
        Architecture::Vgg(depth) => Box::new(vgg::Vgg::new(depth, input, factory, activations, vb)?),
    };
    Ok(backbone)
}

/// Resolve a registry key and build a trainable instance on `device`.
pub fn build_network(
    key: &str,
    input: InputShape,
    options: &NetworkOptions,
    device: &Device,
) -> Result<CandleNetwork> {
    let kind: NetworkKind = key.parse()?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let backbone = build_backbone(kind, input, options, vb)?;
    tracing::debug!(network = %kind, "built network");
    Ok(CandleNetwork::new(
        kind,
        varmap,
        backbone,
        device.clone(),
        options.stochasticity,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MNIST: InputShape = InputShape {
        channels: 1,
        height: 28,
        width: 28,
        classes: 10,
    };

    #[test]
    fn test_registry_has_every_key() {
        let keys: Vec<String> = NetworkKind::all().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys.len(), 33);
        for key in [
            "mnist_base_vnn",
            "cifar10_base_dropout",
            "resnet_classic_50",
            "resnet_vnn_152",
            "vgg_vnn_16",
            "vgg_dropout_11",
        ] {
            assert!(keys.contains(&key.to_string()), "missing {key}");
        }
    }

    #[test]
    fn test_key_round_trip() {
        for kind in NetworkKind::all() {
            assert_eq!(kind.to_string().parse::<NetworkKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_keys() {
        for key in ["mnist_base_bayes", "resnet_vnn_20", "vgg_classic", "alexnet_vnn_8", ""] {
            let err = key.parse::<NetworkKind>().unwrap_err();
            assert!(
                matches!(err, MlError::NotFound { kind: "network", .. }),
                "{key}: {err}"
            );
        }
    }

    #[test]
    fn test_options_validation() {
        let options = NetworkOptions {
            dropout: 1.0,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = NetworkOptions {
            activation_options: BTreeMap::from([("relu_inplace".into(), "true".into())]),
            ..Default::default()
        };
        assert!(options.activation_plan().is_err());
    }

    #[test]
    fn test_build_mnist_base_for_each_family() {
        for parameterization in Parameterization::ALL {
            let key = NetworkKind::new(Architecture::MnistBase, parameterization).to_string();
            let net = build_network(&key, MNIST, &NetworkOptions::default(), &Device::Cpu);
            assert!(net.is_ok(), "{key} failed to build");
        }
    }
}
