pub mod engine;
pub mod lifecycle;
pub mod processor;
pub mod resolver;
pub mod workspace;

pub use engine::{evaluate, matches};
pub use lifecycle::{RuleError, RuleLifecycleManager};
pub use processor::{Bucket, ProcessedView, Recategorization, TabRuleProcessor};
pub use resolver::{of_type, RuleSetResolver};
pub use workspace::Workspace;
