//! Orchestrator behavior: preconditions, learning rate modes, side channels

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::error::Error;
use crate::training::metrics::names;
use crate::training::state::Epoch;
use crate::training::trainer::{Trainer, TrainingEvent};

use super::test_utils::{
    assert_close, create_bias_trainer, create_test_config, create_test_loader, constant_pieces, FrozenModel,
    RecordingSink,
};

#[test]
fn test_trainer_creation() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("run");
    let trainer = create_bias_trainer(create_test_config(&out)).unwrap();

    assert!(!trainer.state().is_resumed());
    assert_eq!(trainer.state().batches_per_epoch, 4);
    assert!(out.join("weights").is_dir());
    assert!(out.join("results").join("results.csv").is_file());
    assert!(out.join("model_params.yaml").is_file());
}

#[test]
fn test_weights_without_epoch_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("run");
    let mut config = create_test_config(&out);
    config.checkpointing.continue_weights = Some(PathBuf::from("epoch_0003.safetensors"));

    let result = create_bias_trainer(config);
    assert!(matches!(result, Err(Error::Config(_))));
    assert!(!out.exists());
}

#[test]
fn test_epoch_without_weights_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("run");
    let mut config = create_test_config(&out);
    config.checkpointing.continue_epoch = Some(3);

    let result = create_bias_trainer(config);
    assert!(matches!(result, Err(Error::Config(_))));
    assert!(!out.exists());
}

#[test]
fn test_missing_resume_weights_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("run");
    let mut config = create_test_config(&out);
    config.checkpointing.continue_epoch = Some(3);
    config.checkpointing.continue_weights = Some(dir.path().join("missing.safetensors"));

    let result = create_bias_trainer(config);
    assert!(matches!(result, Err(Error::Config(_))));
    assert!(!out.exists());
}

#[test]
fn test_constant_learning_rate_never_changes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(dir.path());
    config.optimizer.learning_rate = Some(0.01);

    let result = create_bias_trainer(config).unwrap().train().unwrap();
    for row in &result.rows {
        assert_eq!(row.learning_rate, 0.01);
    }
}

#[test]
fn test_scheduled_learning_rate_is_logged_per_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());

    let result = create_bias_trainer(config).unwrap().train().unwrap();

    // Baseline reports the rate the first update will use
    assert_close(result.rows[0].learning_rate, inverse_lr(0), 1e-12);
    for row in &result.rows[1..] {
        assert_close(row.learning_rate, inverse_lr(row.epoch * 4), 1e-12);
    }
}

fn inverse_lr(step: usize) -> f64 {
    crate::training::optimizers::inverse_sqrt_lr(step, 4, 2)
}

#[test]
fn test_metrics_sink_receives_five_scalars_per_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());
    let sink = RecordingSink::default();
    let scalars = sink.scalars.clone();

    let result = create_bias_trainer(config)
        .unwrap()
        .with_metrics_sink(Box::new(sink))
        .train()
        .unwrap();

    let scalars = scalars.lock().unwrap();
    assert_eq!(scalars.len(), 5 * result.rows.len());

    let eval_accuracy: Vec<(f64, usize)> = scalars
        .iter()
        .filter(|(name, _, _)| name == names::EVAL_ACCURACY)
        .map(|(_, value, step)| (*value, *step))
        .collect();
    let expected: Vec<(f64, usize)> = result.rows.iter().map(|row| (row.eval_accuracy, row.epoch)).collect();
    assert_eq!(eval_accuracy, expected);
}

#[test]
fn test_metrics_sink_does_not_change_outcome() {
    let with_sink_dir = tempfile::tempdir().unwrap();
    let without_sink_dir = tempfile::tempdir().unwrap();

    let with_sink = create_bias_trainer(create_test_config(with_sink_dir.path()))
        .unwrap()
        .with_metrics_sink(Box::new(RecordingSink::default()))
        .train()
        .unwrap();
    let without_sink = create_bias_trainer(create_test_config(without_sink_dir.path()))
        .unwrap()
        .train()
        .unwrap();

    assert_eq!(with_sink.rows, without_sink.rows);
}

#[test]
fn test_jsonl_sink_is_written_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(dir.path());
    config.logging.metrics_sink = true;

    create_bias_trainer(config).unwrap().train().unwrap();

    let content = std::fs::read_to_string(dir.path().join("tensorboard").join("scalars.jsonl")).unwrap();
    assert_eq!(content.lines().count(), 5 * 4);
}

#[test]
fn test_events_follow_epoch_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());
    let (tx, mut rx) = mpsc::unbounded_channel();

    create_bias_trainer(config)
        .unwrap()
        .with_event_monitoring(tx)
        .train()
        .unwrap();

    let mut started = Vec::new();
    let mut completed = Vec::new();
    let mut batches = 0;
    let mut total_steps = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            TrainingEvent::EpochStarted { epoch } => started.push(epoch),
            TrainingEvent::EpochCompleted { epoch, row } => {
                assert_eq!(row.epoch, epoch.number());
                completed.push(epoch);
            }
            TrainingEvent::BatchProgress { batch, total_batches, .. } => {
                assert!(batch == 1 || batch % 2 == 0);
                assert_eq!(total_batches, 4);
                batches += 1;
            }
            TrainingEvent::TrainingCompleted { total_steps: steps } => total_steps = Some(steps),
            TrainingEvent::NewBest { .. } | TrainingEvent::SnapshotSaved { .. } => {}
        }
    }

    let expected = vec![Epoch::Baseline, Epoch::Numbered(1), Epoch::Numbered(2), Epoch::Numbered(3)];
    assert_eq!(started, expected);
    assert_eq!(completed, expected);
    // batches 1, 2 and 4 of each training epoch
    assert_eq!(batches, 3 * 3);
    assert_eq!(total_steps, Some(12));
}

#[test]
fn test_summary_only_rewritten_on_improvement() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());
    let train = create_test_loader(&config, constant_pieces(8), true);
    let eval = create_test_loader(&config, constant_pieces(4), false);

    let mut trainer = Trainer::new(config, Box::new(FrozenModel::new()), train, eval).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    trainer = trainer.with_event_monitoring(tx);
    let result = trainer.train().unwrap();

    // Identical predictions every epoch: only the baseline sets records
    let mut new_best = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let TrainingEvent::NewBest { epoch, .. } = event {
            new_best.push(epoch);
        }
    }
    assert_eq!(new_best, vec![Epoch::Baseline]);
    assert_eq!(result.best_loss.epoch, Some(Epoch::Baseline));
    assert_eq!(result.best_accuracy.epoch, None);

    let summary = std::fs::read_to_string(trainer.checkpoints().best_summary_file()).unwrap();
    assert!(summary.starts_with("Best eval acc epoch: none\n"));
    assert!(summary.contains("Best eval loss epoch: 0\n"));
}

#[test]
fn test_baseline_on_resume_adds_no_row() {
    let dir = tempfile::tempdir().unwrap();
    let mut first = create_test_config(dir.path());
    first.training.epochs = 1;
    create_bias_trainer(first).unwrap().train().unwrap();

    let mut resumed = create_test_config(dir.path());
    resumed.training.epochs = 2;
    resumed.training.baseline_on_resume = true;
    resumed.checkpointing.continue_epoch = Some(1);
    resumed.checkpointing.continue_weights = Some(dir.path().join("weights").join("epoch_0001.safetensors"));

    let result = create_bias_trainer(resumed).unwrap().train().unwrap();
    let epochs: Vec<usize> = result.rows.iter().map(|row| row.epoch).collect();
    assert_eq!(epochs, vec![2]);
}
