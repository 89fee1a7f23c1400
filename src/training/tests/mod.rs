//! Test suite for the training pipeline
//!
//! Topical test files share the toy models and configuration helpers in
//! [`test_utils`].

pub mod integration_tests;
pub mod trainer_tests;

pub use test_utils::{create_test_config, create_test_device};
