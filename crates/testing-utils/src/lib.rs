//! # Task Queue Testing Utils
//!
//! Shared testing utilities for the task queue workspace.
//!
//! ## Features
//!
//! - **Test Data Builders**: [`TaskBuilder`] with sensible defaults
//! - **Executor Doubles**: [`ScriptedExecutor`] with scripted outcomes and concurrency tracking
//! - **Notification Doubles**: [`RecordingNotificationSink`] that keeps every lifecycle event
//! - **Ledger Doubles**: [`FlakyLedgerStore`] whose appends can be made to fail
//! - **Integration Test Helpers**: fast configurations and polling helpers
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! taskqueue-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
