//! Warmup / inverse square root learning rate schedule

use super::Scheduler;

/// Learning rate at `step` for a model of width `d_model`
///
/// Rises linearly until `warmup_steps`, peaks there and then decays with the
/// inverse square root of the step. Step 0 is evaluated as step 1.
pub fn inverse_sqrt_lr(step: usize, d_model: usize, warmup_steps: usize) -> f64 {
    let step = step.max(1) as f64;
    let warmup = warmup_steps.max(1) as f64;

    (d_model as f64).powf(-0.5) * step.powf(-0.5).min(step * warmup.powf(-1.5))
}

/// Scheduler following [`inverse_sqrt_lr`], offset by the steps of earlier runs
#[derive(Debug, Clone)]
pub struct InverseSqrtScheduler {
    /// Model width
    d_model: usize,

    /// Warmup steps
    warmup_steps: usize,

    /// Steps applied before this run started
    init_steps: usize,

    /// Steps taken in this run
    steps_taken: usize,

    /// Multiplier on the schedule
    scale: f64,
}

impl InverseSqrtScheduler {
    /// Create a new scheduler
    pub fn new(d_model: usize, warmup_steps: usize, init_steps: usize, scale: f64) -> Self {
        Self {
            d_model,
            warmup_steps,
            init_steps,
            steps_taken: 0,
            scale,
        }
    }

    /// Learning rate at an arbitrary effective step
    pub fn lr_at(&self, effective_step: usize) -> f64 {
        self.scale * inverse_sqrt_lr(effective_step, self.d_model, self.warmup_steps)
    }

    /// Steps applied before this run started
    pub fn init_steps(&self) -> usize {
        self.init_steps
    }
}

impl Scheduler for InverseSqrtScheduler {
    fn name(&self) -> &str {
        "inverse_sqrt"
    }

    fn step(&mut self) {
        self.steps_taken += 1;
    }

    fn get_lr(&self) -> f64 {
        self.lr_at(self.current_step())
    }

    fn current_step(&self) -> usize {
        self.init_steps + self.steps_taken
    }
}
