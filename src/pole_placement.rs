//! Pole-placement state feedback and a Luenberger state observer for a second order plant.

use serde::{Deserialize, Serialize};

use crate::linalg::{dot, mat_vec, Matrix};

/// State-space plant model and the gains placed on it.
///
/// `x[k+1] = A x[k] + B u[k]`, `y[k] = C x[k]`, with the control law `u = Ko r - K x` and the
/// observer gain `L`.  A zero `L` turns the observer into an open-loop model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolePlacementConfig {
    pub a: Matrix<f64, 2, 2>,
    pub b: [f64; 2],
    pub c: [f64; 2],
    pub k: [f64; 2],
    pub ko: f64,
    pub l: [f64; 2],
}

impl PolePlacementConfig {
    /// Gains for feedback on the two measured plant states.
    pub fn measured_state() -> Self {
        Self {
            k: [0.4881977, 0.6236087],
            ko: 2.115,
            l: [0.0, 0.0],
            ..Self::observed()
        }
    }

    /// Gains for feedback on the observer estimate.
    pub fn observed() -> Self {
        Self {
            a: [[1.24881977, -0.33763913], [1.0, 0.0]],
            b: [1.0, 0.0],
            c: [0.05233013, 0.03648923],
            k: [1.3581298, -0.9386444],
            ko: 1.47229047,
            l: [-4.64320567, -12.13743388],
        }
    }

    /// Control law `Ko r - K x`.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_control::PolePlacementConfig;
    ///
    /// let config = PolePlacementConfig::measured_state();
    /// let u = config.control(&[0.0, 0.0], 2.0);
    /// assert_eq!(u, 2.0 * 2.115);
    /// ```
    pub fn control(&self, state: &[f64; 2], reference: f64) -> f64 {
        self.ko * reference - dot(&self.k, state)
    }
}

impl Default for PolePlacementConfig {
    fn default() -> Self {
        Self::observed()
    }
}

/// Luenberger observer reconstructing the plant state from its input and output.
#[derive(Debug, Clone, PartialEq)]
pub struct Observer {
    config: PolePlacementConfig,
    x_hat: [f64; 2],
}

impl Observer {
    /// Observer starting from a zero estimate.
    pub fn new(config: PolePlacementConfig) -> Self {
        Self::with_state(config, [0.0; 2])
    }

    /// Observer starting from a given estimate.
    pub fn with_state(config: PolePlacementConfig, x_hat: [f64; 2]) -> Self {
        Self { config, x_hat }
    }

    /// Advance the estimate by one sample.
    ///
    /// `x' = A x + B u + L (y - C x)`; the prediction and the innovation are both formed from the
    /// old estimate before it is replaced.
    pub fn observe(&mut self, u: f64, y: f64) -> [f64; 2] {
        let c = &self.config;
        let predicted = mat_vec(&c.a, &self.x_hat);
        let feedforward = c.b.map(|b| b * u);
        let residual = y - dot(&c.c, &self.x_hat);
        let innovation = c.l.map(|l| l * residual);

        self.x_hat = [
            predicted[0] + feedforward[0] + innovation[0],
            predicted[1] + feedforward[1] + innovation[1],
        ];
        self.x_hat
    }

    /// Current estimate.
    pub fn estimate(&self) -> [f64; 2] {
        self.x_hat
    }

    /// Zero the estimate.
    pub fn reset(&mut self) {
        self.x_hat = [0.0; 2];
    }

    pub fn config(&self) -> &PolePlacementConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    #[test]
    fn zero_gain_observer_follows_model() {
        let config = PolePlacementConfig { l: [0.0, 0.0], ..PolePlacementConfig::observed() };
        let mut observer = Observer::with_state(config, [1.0, 2.0]);
        let x = observer.observe(0.5, 123.0);
        assert_abs_diff_eq!(x[0], 1.24881977 - 2.0 * 0.33763913 + 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn innovation_by_hand() {
        let config = PolePlacementConfig::observed();
        let mut observer = Observer::new(config);
        let x = observer.observe(0.0, 1.0);
        assert_eq!(x, config.l);
        assert_eq!(observer.estimate(), config.l);
        observer.reset();
        assert_eq!(observer.estimate(), [0.0, 0.0]);
    }

    #[test]
    fn estimate_converges_to_plant_state() {
        let config = PolePlacementConfig::observed();
        let mut observer = Observer::new(config);
        let mut x = [0.3, -0.1];
        for k in 0..1500 {
            let u = if (k / 100) % 2 == 0 { 2.0 } else { 1.0 };
            let y = dot(&config.c, &x);
            observer.observe(u, y);
            let ax = mat_vec(&config.a, &x);
            x = [ax[0] + config.b[0] * u, ax[1] + config.b[1] * u];
        }
        let x_hat = observer.estimate();
        assert_abs_diff_eq!(x_hat[0], x[0], epsilon = 1e-6);
        assert_abs_diff_eq!(x_hat[1], x[1], epsilon = 1e-6);
    }

    proptest! {
        #[test]
        fn control_is_pure(
            x0 in -10.0f64..10.0,
            x1 in -10.0f64..10.0,
            r in -5.0f64..5.0,
        ) {
            let config = PolePlacementConfig::measured_state();
            let before = config;
            let u = config.control(&[x0, x1], r);
            prop_assert_eq!(u, config.ko * r - (config.k[0] * x0 + config.k[1] * x1));
            prop_assert_eq!(u, config.control(&[x0, x1], r));
            prop_assert_eq!(config, before);
        }

        #[test]
        fn observer_is_linear(
            x0 in -5.0f64..5.0,
            x1 in -5.0f64..5.0,
            u in -3.0f64..3.0,
            y in -3.0f64..3.0,
            scale in -4.0f64..4.0,
        ) {
            let config = PolePlacementConfig::observed();
            let base = Observer::with_state(config, [x0, x1]).observe(u, y);
            let scaled = Observer::with_state(config, [scale * x0, scale * x1])
                .observe(scale * u, scale * y);
            for (s, b) in scaled.iter().zip(base) {
                prop_assert!((s - scale * b).abs() <= 1e-9 * (1.0 + b.abs() * scale.abs()));
            }
        }
    }
}
