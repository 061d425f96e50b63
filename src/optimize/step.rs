//! Levenberg-Marquardt step controller.
//!
//! Accepts or rejects proposed steps by the ratio of actual to predicted
//! energy decrease. Accepted steps shrink λ by the Nielsen rule
//! `λ ← λ·max(m, 1 − (2q − 1)³)`; rejections inflate λ by a fail
//! multiplier that itself grows over consecutive rejections.

use tracing::debug;

use crate::settings::StepControlSettings;

pub struct StepController {
    lambda: f64,
    fail_multiplier: f64,
    settings: StepControlSettings,
}

impl StepController {
    pub fn new(settings: &StepControlSettings) -> Self {
        StepController {
            lambda: settings.initial_lambda,
            fail_multiplier: settings.initial_fail_multiplier,
            settings: *settings,
        }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Judge one proposed step. Returns whether it is accepted and adapts
    /// the damping state accordingly.
    pub fn new_step(&mut self, old_energy: f64, new_energy: f64, predicted_energy: f64) -> bool {
        let mut predicted_diff = old_energy - predicted_energy;
        let mut actual_diff = old_energy - new_energy;
        if predicted_diff < 0.0 {
            predicted_diff = -predicted_diff;
            actual_diff = -actual_diff;
        }

        let quality = actual_diff / predicted_diff;
        let is_successful = quality > self.settings.accepted_quality && new_energy < old_energy;

        let old_lambda = self.lambda;
        if is_successful {
            let q2m1 = 2.0 * quality - 1.0;
            self.lambda *= self
                .settings
                .min_lambda_multiplier
                .max(1.0 - q2m1 * q2m1 * q2m1);
            self.fail_multiplier = self.settings.initial_fail_multiplier;
        } else {
            self.reject();
        }

        debug!(
            actual_diff,
            predicted_diff,
            quality,
            old_lambda,
            lambda = self.lambda,
            accepted = is_successful,
            "step judged"
        );

        is_successful
    }

    /// Inflate damping without a completed energy comparison, e.g. when
    /// the linear solve itself failed.
    pub fn reject(&mut self) {
        self.lambda *= self.fail_multiplier;
        self.fail_multiplier *= self.settings.fail_multiplier_multiplier;
    }
}
