//! Core library for `bizplan`: turns rows of business ideas into drafted
//! business plans using a locally hosted model.
//!
//! ```text
//! record::load_records --> Vec<BusinessRecord>
//!                               |
//!                               v
//! batch::run_batch --(one task per record, bounded by a semaphore)-->
//!     prompt::PromptTemplate::render
//!     model::ModelClient::generate
//!     writer::PlanWriter::write
//!                               |
//!                               v
//!     BatchResult + failure_log::FailureSink
//! ```

pub mod batch;
pub mod failure_log;
pub mod model;
pub mod prompt;
pub mod record;
pub mod setup;
pub mod writer;

pub use batch::{BatchConfig, BatchProgress, BatchResult, Failure, PlanPipeline, TaskError, run_batch};
pub use failure_log::{FailureSink, FileFailureLog, MemoryFailureSink};
pub use model::{ModelBackend, ModelClient, ModelError};
pub use prompt::PromptTemplate;
pub use record::{BusinessRecord, RecordError, RecordSet, SourceError, load_records};
pub use writer::{FsPlanWriter, PlanDocument, PlanWriter, WriteError};
