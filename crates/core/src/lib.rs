pub mod account;
pub mod id;
pub mod money;
pub mod period;
pub mod rule;
pub mod tab;
pub mod transaction;

pub use account::{AccountSummary, Group, ProviderAccount, ProviderBalances};
pub use id::{AccountId, GroupId, ItemId, RuleId, TabId, TransactionId};
pub use money::Money;
pub use period::Quarter;
pub use rule::{
    Condition, GroupKey, Method, Rule, RuleDraft, RuleKind, RulePatch, RuleRecord, RuleType,
    SortKey, TabRef, ValidationError, GLOBAL,
};
pub use tab::Tab;
pub use transaction::{Property, Transaction};
