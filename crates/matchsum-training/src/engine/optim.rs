//! Optimizers with a serializable state dict.

use crate::engine::model::{Gradients, StateDict};
use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub trait Optimizer: Send {
    /// Apply one update to the parameters this optimizer was built for.
    fn step(&mut self, params: &mut StateDict, grads: &Gradients) -> TrainingResult<()>;

    fn lr(&self) -> f64;

    fn set_lr(&mut self, lr: f64);

    /// Optimizer-defined state, stored opaquely in snapshots.
    fn state_dict(&self) -> TrainingResult<serde_json::Value>;

    fn load_state_dict(&mut self, state: &serde_json::Value) -> TrainingResult<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdamState {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    /// Number of updates applied so far.
    pub t: u64,
    pub params: Vec<String>,
    #[serde(default)]
    pub exp_avg: BTreeMap<String, Vec<f32>>,
    #[serde(default)]
    pub exp_avg_sq: BTreeMap<String, Vec<f32>>,
}

/// Adam over a fixed set of named parameters.
#[derive(Debug, Clone)]
pub struct Adam {
    state: AdamState,
}

impl Adam {
    #[must_use]
    pub fn new(lr: f64, params: Vec<String>) -> Self {
        Self {
            state: AdamState {
                lr,
                beta1: 0.9,
                beta2: 0.999,
                eps: 1e-8,
                t: 0,
                params,
                exp_avg: BTreeMap::new(),
                exp_avg_sq: BTreeMap::new(),
            },
        }
    }

    #[cfg(test)]
    fn step_count(&self) -> u64 {
        self.state.t
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut StateDict, grads: &Gradients) -> TrainingResult<()> {
        let st = &mut self.state;
        st.t += 1;
        let t = i32::try_from(st.t).unwrap_or(i32::MAX);
        let bias1 = 1.0 - st.beta1.powi(t);
        let bias2 = 1.0 - st.beta2.powi(t);

        for name in &st.params {
            let Some(grad) = grads.get(name) else {
                continue;
            };
            let param = params
                .get_mut(name)
                .ok_or_else(|| TrainingError::Optimizer(format!("unknown parameter `{name}`")))?;
            if grad.len() != param.data.len() {
                return Err(TrainingError::Optimizer(format!(
                    "gradient for `{name}` has {} values, parameter has {}",
                    grad.len(),
                    param.data.len()
                )));
            }

            let m = st.exp_avg.entry(name.clone()).or_insert_with(|| vec![0.0; grad.len()]);
            let v = st.exp_avg_sq.entry(name.clone()).or_insert_with(|| vec![0.0; grad.len()]);
            for (((p, g), m), v) in param.data.iter_mut().zip(grad).zip(m.iter_mut()).zip(v.iter_mut()) {
                let g = f64::from(*g);
                let m_t = st.beta1 * f64::from(*m) + (1.0 - st.beta1) * g;
                let v_t = st.beta2 * f64::from(*v) + (1.0 - st.beta2) * g * g;
                *m = m_t as f32;
                *v = v_t as f32;
                let update = st.lr * (m_t / bias1) / ((v_t / bias2).sqrt() + st.eps);
                *p -= update as f32;
            }
        }
        Ok(())
    }

    fn lr(&self) -> f64 {
        self.state.lr
    }

    fn set_lr(&mut self, lr: f64) {
        self.state.lr = lr;
    }

    fn state_dict(&self) -> TrainingResult<serde_json::Value> {
        Ok(serde_json::to_value(&self.state)?)
    }

    fn load_state_dict(&mut self, state: &serde_json::Value) -> TrainingResult<()> {
        let loaded: AdamState = serde_json::from_value(state.clone())
            .map_err(|e| TrainingError::Optimizer(format!("invalid Adam state: {e}")))?;
        if loaded.params != self.state.params {
            return Err(TrainingError::Optimizer(format!(
                "parameter groups differ: saved {:?}, current {:?}",
                loaded.params, self.state.params
            )));
        }
        self.state = loaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::Tensor;

    fn params() -> StateDict {
        let mut p = StateDict::new();
        p.insert("w".to_string(), Tensor::vector(vec![1.0, -1.0], true));
        p
    }

    #[test]
    fn test_adam_moves_against_gradient() {
        let mut params = params();
        let mut adam = Adam::new(0.1, vec!["w".to_string()]);
        let mut grads = Gradients::new();
        grads.insert("w".to_string(), vec![1.0, -1.0]);

        adam.step(&mut params, &grads).unwrap();
        // The first bias-corrected Adam step moves each weight by ~lr.
        assert!((params["w"].data[0] - 0.9).abs() < 1e-4);
        assert!((params["w"].data[1] + 0.9).abs() < 1e-4);
        assert_eq!(adam.step_count(), 1);
    }

    #[test]
    fn test_zero_lr_leaves_params_unchanged() {
        let mut params = params();
        let mut adam = Adam::new(0.0, vec!["w".to_string()]);
        let mut grads = Gradients::new();
        grads.insert("w".to_string(), vec![3.0, 3.0]);
        adam.step(&mut params, &grads).unwrap();
        assert_eq!(params["w"].data, vec![1.0, -1.0]);
    }

    #[test]
    fn test_state_dict_restores_moments() {
        let mut params = params();
        let mut adam = Adam::new(0.05, vec!["w".to_string()]);
        let mut grads = Gradients::new();
        grads.insert("w".to_string(), vec![0.5, 0.25]);
        adam.step(&mut params, &grads).unwrap();

        let saved = adam.state_dict().unwrap();
        let mut restored = Adam::new(0.0, vec!["w".to_string()]);
        restored.load_state_dict(&saved).unwrap();
        assert_eq!(restored.step_count(), 1);
        assert!((restored.lr() - 0.05).abs() < f64::EPSILON);

        let mut other = Adam::new(0.0, vec!["v".to_string()]);
        assert!(other.load_state_dict(&saved).is_err());
    }
}
