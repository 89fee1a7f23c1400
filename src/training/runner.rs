//! Training and evaluation passes over one epoch
//!
//! Both passes are stateless apart from what they are handed: the training
//! pass mutates the model through the optimizer and advances the run's step
//! counter, the evaluation pass only reads.

use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::model::SequenceModel;
use crate::training::data::DataLoader;
use crate::training::loss::LossFunction;
use crate::training::metrics::accuracy;
use crate::training::optimizers::{Optimizer, Scheduler};
use crate::training::state::{Epoch, RunState};
use crate::training::trainer::TrainingEvent;

/// Mean loss and accuracy of an evaluation pass
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EvalResult {
    /// Arithmetic mean of per-batch losses
    pub loss: f64,
    /// Arithmetic mean of per-batch accuracies
    pub accuracy: f64,
}

/// Runs the passes of a single epoch
#[derive(Debug, Clone, Copy)]
pub struct EpochRunner {
    print_modulus: usize,
    pad_token: u32,
}

impl EpochRunner {
    /// Create a runner logging every `print_modulus` batches
    pub fn new(print_modulus: usize, pad_token: u32) -> Self {
        Self {
            print_modulus: print_modulus.max(1),
            pad_token,
        }
    }

    /// One pass of parameter updates over `loader`
    ///
    /// Every batch is one optimizer update and one step of the run's step
    /// counter. When a scheduler is attached it advances after the update and
    /// its new learning rate is applied before the next batch. Returns the
    /// number of batches processed.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(epoch = %epoch))]
    pub fn train_epoch(
        &self,
        epoch: Epoch,
        model: &dyn SequenceModel,
        loader: &mut DataLoader,
        loss_fn: &dyn LossFunction,
        optimizer: &mut dyn Optimizer,
        scheduler: &mut Option<Box<dyn Scheduler>>,
        state: &mut RunState,
        events: Option<&UnboundedSender<TrainingEvent>>,
    ) -> Result<usize> {
        let total = loader.num_batches();
        let mut processed = 0;

        for (index, batch) in loader.iter().enumerate() {
            let started = Instant::now();
            let batch = batch?;

            let logits = model.forward(&batch.input, true)?;
            let loss = loss_fn.forward(&logits, &batch.target)?;
            let loss_value = f64::from(loss.to_scalar::<f32>()?);

            optimizer.step(&loss)?;
            state.advance_step();
            if let Some(scheduler) = scheduler.as_mut() {
                scheduler.step();
                optimizer.set_learning_rate(scheduler.get_lr());
            }
            processed += 1;

            let batch_number = index + 1;
            if batch_number == 1 || batch_number % self.print_modulus == 0 {
                let elapsed = started.elapsed();
                info!(
                    "Epoch {} batch {}/{} | loss: {:.6} | lr: {:.8} | {:.3}s",
                    epoch,
                    batch_number,
                    total,
                    loss_value,
                    optimizer.learning_rate(),
                    elapsed.as_secs_f64()
                );
                if let Some(tx) = events {
                    let _ = tx.send(TrainingEvent::BatchProgress {
                        epoch,
                        batch: batch_number,
                        total_batches: total,
                        loss: loss_value,
                        learning_rate: optimizer.learning_rate(),
                        elapsed,
                    });
                }
            }
        }

        debug!("Training pass finished after {} batches, global step {}", processed, state.global_step);
        Ok(processed)
    }

    /// Mean loss and accuracy over `loader` without updating the model
    #[instrument(skip_all, fields(loss = loss_fn.name()))]
    pub fn evaluate(
        &self,
        model: &dyn SequenceModel,
        loader: &mut DataLoader,
        loss_fn: &dyn LossFunction,
    ) -> Result<EvalResult> {
        let mut sum_loss = 0.0;
        let mut sum_accuracy = 0.0;
        let mut batches = 0usize;

        for batch in loader.iter() {
            let batch = batch?;
            let logits = model.forward(&batch.input, false)?.detach();

            let loss = loss_fn.forward(&logits, &batch.target)?;
            sum_loss += f64::from(loss.to_scalar::<f32>()?);
            sum_accuracy += accuracy(&logits, &batch.target, self.pad_token)?;
            batches += 1;
        }

        if batches == 0 {
            warn!("Evaluation loader produced no batches, reporting zero loss and accuracy");
            return Ok(EvalResult::default());
        }

        Ok(EvalResult {
            loss: sum_loss / batches as f64,
            accuracy: sum_accuracy / batches as f64,
        })
    }
}
