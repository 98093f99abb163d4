//! Ordered composition of projection, activation and normalisation stages.
//!
//! A [`Sequential`] applies its stages in insertion order and exposes the
//! parameters of each stage under `<scope>.<index>.<name>`, so a stack of
//! `Linear -> Tanh -> Linear` yields `scope.0.weight` and `scope.2.weight`.

use std::sync::Arc;

use candle_core::{Result, Tensor, Var};

use crate::{
    activations::{self, Activation, ActivationKind},
    dtypes::PrecisionPolicy,
    linear::Linear,
    norm::LayerNorm,
};

/// One step of a [`Sequential`] stack.
#[derive(Debug, Clone)]
pub enum Stage {
    Linear(Linear),
    Activation(Arc<dyn Activation>),
    Norm(LayerNorm),
}

impl Stage {
    pub fn activation(kind: ActivationKind) -> Self {
        Stage::Activation(activations::builtin(kind))
    }

    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        match self {
            Stage::Linear(linear) => linear.forward(hidden, policy),
            Stage::Activation(activation) => activation.forward(hidden, policy),
            Stage::Norm(norm) => norm.forward(hidden, policy),
        }
    }

    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        match self {
            Stage::Linear(linear) => linear.named_parameters(scope),
            Stage::Activation(_) => Vec::new(),
            Stage::Norm(norm) => norm.named_parameters(scope),
        }
    }
}

/// Stages applied one after another.
#[derive(Debug, Clone, Default)]
pub struct Sequential {
    stages: Vec<Stage>,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage, builder style.
    pub fn with(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let mut current = hidden.clone();
        for stage in &self.stages {
            current = stage.forward(&current, policy)?;
        }
        Ok(current)
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        self.stages
            .iter()
            .enumerate()
            .flat_map(|(index, stage)| stage.named_parameters(&format!("{scope}.{index}")))
            .collect()
    }
}
