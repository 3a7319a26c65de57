//! Publish session
//!
//! Everything between the capture callback and the transport: sample units,
//! classification, connection events and the session state machine.

pub mod classifier;
pub mod event;
pub mod publish;
pub mod sample;
pub mod state;

pub use classifier::{BufferClassifier, Classified, EncoderInput};
pub use event::{ConnectionEvent, ErrorCode};
pub use publish::{Control, Delivery, DropReason, SampleSink, SessionHandle};
pub use sample::{MediaPayload, SampleKind, SampleUnit};
pub use state::{FailureReason, PublishState};
