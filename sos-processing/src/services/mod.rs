//! Processing services

pub mod batch_processor;
pub mod instance_publisher;
pub mod observation_transformer;
pub mod processing_job;

pub use batch_processor::{BatchProcessor, RunStatistics, StatisticsSnapshot};
pub use instance_publisher::{
    ActivationError, InstancePublisher, PublishOutcome, PublisherState, RunTicket,
};
pub use observation_transformer::{TransformContext, TransformDiagnostics};
pub use processing_job::{JobOutcome, ProcessingJob};
