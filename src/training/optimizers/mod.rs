//! Optimizers and learning rate schedulers
//!
//! The trainer talks to an [`Optimizer`] that owns the update rule and to an
//! optional [`Scheduler`] that recomputes the learning rate after every update.
//! Runs with a constant learning rate have no scheduler at all.

pub mod adam;
pub mod schedulers;

pub use adam::AdamOptimizer;
pub use schedulers::{inverse_sqrt_lr, InverseSqrtScheduler};

use candle_core::Tensor;
use candle_nn::VarMap;

use crate::error::Result;
use crate::training::config::{LearningRateMode, OptimizerConfig};

/// Trait for optimizers
pub trait Optimizer: Send {
    /// Optimizer name
    fn name(&self) -> &str;

    /// Back-propagate `loss` and apply one parameter update
    fn step(&mut self, loss: &Tensor) -> Result<()>;

    /// Get current learning rate
    fn learning_rate(&self) -> f64;

    /// Set learning rate
    fn set_learning_rate(&mut self, lr: f64);

    /// Number of updates applied so far
    fn step_count(&self) -> usize;
}

/// Trait for learning rate schedulers
pub trait Scheduler: Send {
    /// Scheduler name
    fn name(&self) -> &str;

    /// Advance by one training step
    fn step(&mut self);

    /// Learning rate for the current step
    fn get_lr(&self) -> f64;

    /// Effective step, including any offset from a resumed run
    fn current_step(&self) -> usize;
}

/// Create the Adam optimizer over every variable in `var_map`
pub fn create_optimizer(config: &OptimizerConfig, var_map: &VarMap, initial_lr: f64) -> Result<Box<dyn Optimizer>> {
    let optimizer = AdamOptimizer::new(var_map, initial_lr, config.beta1, config.beta2, config.epsilon)?;
    Ok(Box::new(optimizer))
}

/// Create the scheduler for a run, or `None` when the learning rate is constant
///
/// `init_steps` is the number of updates already applied by earlier runs.
pub fn create_scheduler(config: &OptimizerConfig, d_model: usize, init_steps: usize) -> Option<Box<dyn Scheduler>> {
    match config.lr_mode() {
        LearningRateMode::Scheduled { warmup_steps } => Some(Box::new(InverseSqrtScheduler::new(
            d_model,
            warmup_steps,
            init_steps,
            config.lr_scale,
        ))),
        LearningRateMode::Constant(_) => None,
    }
}

/// Learning rate applied before the first update of a run
pub fn initial_learning_rate(config: &OptimizerConfig, scheduler: Option<&dyn Scheduler>) -> f64 {
    match (config.lr_mode(), scheduler) {
        (_, Some(scheduler)) => scheduler.get_lr(),
        (LearningRateMode::Constant(lr), None) => lr,
        (LearningRateMode::Scheduled { .. }, None) => config.lr_scale,
    }
}
