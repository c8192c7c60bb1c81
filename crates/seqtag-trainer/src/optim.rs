//! SGD with momentum over candle variables.

use candle_core::backprop::GradStore;
use candle_core::{Result, Tensor, Var};
use candle_nn::Optimizer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SgdConfig {
    pub learning_rate: f64,
    pub momentum: f64,
}

/// Stochastic gradient descent with classical momentum:
/// `v = momentum * v + grad`, `w = w - lr * v`.
pub struct MomentumSgd {
    vars: Vec<(Var, Option<Tensor>)>,
    config: SgdConfig,
}

impl Optimizer for MomentumSgd {
    type Config = SgdConfig;

    fn new(vars: Vec<Var>, config: SgdConfig) -> Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| (var, None))
            .collect();
        Ok(Self { vars, config })
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        let SgdConfig {
            learning_rate,
            momentum,
        } = self.config;

        for (var, velocity) in self.vars.iter_mut() {
            let Some(grad) = grads.get(var) else {
                continue;
            };
            let update = match velocity.take() {
                Some(previous) if momentum > 0.0 => previous.affine(momentum, 0.0)?.add(grad)?,
                _ => grad.clone(),
            };
            var.set(&var.sub(&update.affine(learning_rate, 0.0)?)?)?;
            if momentum > 0.0 {
                *velocity = Some(update);
            }
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.learning_rate = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn quadratic_step(optimizer: &mut MomentumSgd, x: &Var) {
        let loss = x.as_tensor().sqr().unwrap().sum_all().unwrap();
        optimizer.backward_step(&loss).unwrap();
    }

    #[test]
    fn test_plain_sgd_step() {
        let x = Var::new(&[1f32], &Device::Cpu).unwrap();
        let mut optimizer = MomentumSgd::new(
            vec![x.clone()],
            SgdConfig {
                learning_rate: 0.1,
                momentum: 0.0,
            },
        )
        .unwrap();

        quadratic_step(&mut optimizer, &x);
        let value = x.as_tensor().to_vec1::<f32>().unwrap()[0];
        assert!((value - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_momentum_accumulates() {
        let x = Var::new(&[1f32], &Device::Cpu).unwrap();
        let mut optimizer = MomentumSgd::new(
            vec![x.clone()],
            SgdConfig {
                learning_rate: 0.1,
                momentum: 0.9,
            },
        )
        .unwrap();

        quadratic_step(&mut optimizer, &x);
        quadratic_step(&mut optimizer, &x);
        // v1 = 2.0, x1 = 0.8; v2 = 0.9 * 2.0 + 1.6 = 3.4, x2 = 0.8 - 0.34
        let value = x.as_tensor().to_vec1::<f32>().unwrap()[0];
        assert!((value - 0.46).abs() < 1e-5);
    }

    #[test]
    fn test_set_learning_rate() {
        let mut optimizer = MomentumSgd::new(
            vec![],
            SgdConfig {
                learning_rate: 0.1,
                momentum: 0.9,
            },
        )
        .unwrap();
        optimizer.set_learning_rate(0.05);
        assert_eq!(optimizer.learning_rate(), 0.05);
    }
}
