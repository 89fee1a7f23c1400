//! End-to-end runs of the training orchestrator

use crate::training::checkpoints::ResultsLog;
use crate::training::optimizers::inverse_sqrt_lr;
use crate::training::state::{Epoch, TrainingPhase};

use super::test_utils::{
    assert_close, create_bias_trainer, create_test_config, create_test_trainer, snapshot_names,
};

#[test]
fn test_full_training_loop() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());

    let mut trainer = create_bias_trainer(config).unwrap();
    let result = trainer.train().unwrap();

    let epochs: Vec<usize> = result.rows.iter().map(|row| row.epoch).collect();
    assert_eq!(epochs, vec![0, 1, 2, 3]);
    assert_eq!(result.final_state.global_step, 12);
    assert_eq!(result.final_state.phase, TrainingPhase::Done);
    assert_eq!(result.final_state.completed, Some(Epoch::Numbered(3)));

    // Accuracy is perfect from the start, the loss keeps falling
    assert_eq!(result.best_accuracy.epoch, Some(Epoch::Baseline));
    assert_eq!(result.best_accuracy.value, 1.0);
    assert_eq!(result.best_loss.epoch, Some(Epoch::Numbered(3)));

    let checkpoints = trainer.checkpoints();
    assert!(checkpoints.best_accuracy_file().is_file());
    assert!(checkpoints.best_loss_file().is_file());
    assert!(checkpoints.params_file().is_file());

    let summary = std::fs::read_to_string(checkpoints.best_summary_file()).unwrap();
    assert!(summary.starts_with("Best eval acc epoch: 0\nBest eval acc: 1\n"));
    assert!(summary.contains("Best eval loss epoch: 3\n"));

    let rows = ResultsLog::open(checkpoints.results_file()).unwrap().read_rows().unwrap();
    assert_eq!(rows, result.rows);
}

#[test]
fn test_feedforward_model_trains_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());

    let mut trainer = create_test_trainer(config).unwrap();
    let result = trainer.train().unwrap();

    assert_eq!(result.rows.len(), 4);
    assert_eq!(result.final_state.global_step, 12);
    for row in &result.rows {
        assert!(row.train_loss.is_finite());
        assert!(row.eval_loss.is_finite());
        assert!((0.0..=1.0).contains(&row.eval_accuracy));
    }

    // The baseline loss is finite, so it always sets the first loss record
    assert!(result.best_loss.epoch.is_some());
    assert!(trainer.checkpoints().best_loss_file().is_file());
}

#[test]
fn test_snapshots_follow_weight_modulus() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(dir.path());
    config.training.epochs = 4;
    config.training.weight_modulus = 2;

    let mut trainer = create_bias_trainer(config).unwrap();
    let result = trainer.train().unwrap();

    assert_eq!(
        snapshot_names(dir.path()),
        vec!["epoch_0002.safetensors", "epoch_0004.safetensors"]
    );
    assert_eq!(result.snapshots.len(), 2);
}

#[test]
fn test_every_epoch_snapshot_skips_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());

    create_bias_trainer(config).unwrap().train().unwrap();

    assert_eq!(
        snapshot_names(dir.path()),
        vec![
            "epoch_0001.safetensors",
            "epoch_0002.safetensors",
            "epoch_0003.safetensors"
        ]
    );
}

#[test]
fn test_resumed_run_continues_numbering_and_schedule() {
    let dir = tempfile::tempdir().unwrap();

    // First process stops after epoch 2
    let mut first = create_test_config(dir.path());
    first.training.epochs = 2;
    create_bias_trainer(first).unwrap().train().unwrap();

    // Second process continues from the epoch 2 snapshot up to epoch 4
    let mut resumed = create_test_config(dir.path());
    resumed.training.epochs = 4;
    resumed.checkpointing.continue_epoch = Some(2);
    resumed.checkpointing.continue_weights = Some(dir.path().join("weights").join("epoch_0002.safetensors"));

    let mut trainer = create_bias_trainer(resumed).unwrap();
    let batches_per_epoch = 4;
    assert_eq!(trainer.state().global_step, 2 * batches_per_epoch);
    assert_eq!(trainer.state().first_training_epoch(), Epoch::Numbered(3));
    assert_close(
        trainer.learning_rate(),
        inverse_sqrt_lr(2 * batches_per_epoch, 4, 2),
        1e-12,
    );

    let result = trainer.train().unwrap();
    let epochs: Vec<usize> = result.rows.iter().map(|row| row.epoch).collect();
    assert_eq!(epochs, vec![3, 4]);
    assert_eq!(result.final_state.global_step, 4 * batches_per_epoch);

    // Same log, one header, rows from both processes in order
    let rows = ResultsLog::open(trainer.checkpoints().results_file())
        .unwrap()
        .read_rows()
        .unwrap();
    let logged: Vec<usize> = rows.iter().map(|row| row.epoch).collect();
    assert_eq!(logged, vec![0, 1, 2, 3, 4]);

    // An uninterrupted run ends on the same learning rate
    let other = tempfile::tempdir().unwrap();
    let mut uninterrupted = create_test_config(other.path());
    uninterrupted.training.epochs = 4;
    let straight = create_bias_trainer(uninterrupted).unwrap().train().unwrap();
    assert_close(
        result.rows.last().unwrap().learning_rate,
        straight.rows.last().unwrap().learning_rate,
        1e-12,
    );
}
