pub mod link;
pub mod orchestrator;
pub mod session;
pub mod tracker;

pub use link::{create_link_token, exchange_public_token, LinkError};
pub use orchestrator::{SyncConfig, SyncOrchestrator, SyncOutcome, TransactionSink};
pub use session::SyncSession;
pub use tracker::{PollConfig, PollError, PollHandle, PollOutcome, PollProgress, SyncStatusTracker};
