//! Dense matrix multiplication with interchangeable algorithms and
//! parallelization strategies.
//!
//! Two square (or conformable) matrices are multiplied by one of three
//! [`Algorithm`]s under one of four [`ParallelMode`]s:
//!
//! | algorithm   | sequential | shared memory | distributed | hybrid |
//! |-------------|:----------:|:-------------:|:-----------:|:------:|
//! | `Naive`     | yes        | yes           | yes         | yes    |
//! | `Strassen`  | yes        | yes           | yes         | yes    |
//! | `Reference` | yes        | yes           | -           | -      |
//!
//! Shared-memory work runs on a [rayon] pool. Distributed work runs on an
//! in-process [`Cluster`] of workers that exchange data through
//! collectives. The [`verification`] module compares results element by
//! element and runs every selected algorithm side by side.
//!
//! ```
//! use densemm::{dispatch, Algorithm, Config, Matrix, ParallelMode};
//!
//! let a = Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
//! let config = Config::new(Algorithm::Strassen, ParallelMode::SharedMemory).with_threads(2);
//! let c = dispatch::multiply(&a, &a, &config, None).unwrap();
//! assert_eq!(c.as_slice(), &[7.0, 10.0, 15.0, 22.0]);
//! ```

pub mod algorithms;
pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod matrix;
pub mod runner;
pub mod verification;

pub use cluster::{Cluster, Communicator, RowPartition, ROOT};
pub use config::{Algorithm, Config, Optimization, ParallelMode, Tolerance};
pub use dispatch::Strategy;
pub use error::{MatmulError, Result};
pub use matrix::{ComparisonResult, Matrix, WorstElement};
pub use runner::{run, Outcome, RunReport};
pub use verification::{ComparisonReport, SuiteReport, Validation};
