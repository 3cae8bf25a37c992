use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::account::Group;
use super::id::{GroupId, TabId};
use super::transaction::Transaction;

/// A saved view over the user's transactions, processed independently of
/// every other tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    #[serde(rename = "_id", alias = "id")]
    pub id: TabId,
    pub tab_name: String,
    #[serde(default)]
    pub show_for_group: BTreeSet<GroupId>,
    #[serde(default)]
    pub is_selected: bool,
    #[serde(default)]
    pub sort: i64,
}

impl Tab {
    pub fn new(id: TabId, tab_name: &str) -> Self {
        Tab {
            id,
            tab_name: tab_name.to_string(),
            show_for_group: BTreeSet::new(),
            is_selected: false,
            sort: 0,
        }
    }

    /// Whether `tx` belongs in this tab. A tab bound to no group sees
    /// everything; otherwise the transaction's account must sit in one of
    /// the tab's groups.
    pub fn shows(&self, tx: &Transaction, groups: &[Group]) -> bool {
        if self.show_for_group.is_empty() {
            return true;
        }
        groups
            .iter()
            .filter(|g| self.show_for_group.contains(&g.id))
            .any(|g| g.contains_account(&tx.account_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountSummary;
    use crate::id::{AccountId, ItemId, TransactionId};
    use crate::money::Money;
    use chrono::NaiveDate;

    fn tx(account: &str) -> Transaction {
        Transaction {
            id: TransactionId::new("t1"),
            amount: Money::from_cents(100),
            category: String::new(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            name: "Test".to_string(),
            notes: String::new(),
            account_id: AccountId::new(account),
            item_id: ItemId::new("item-1"),
        }
    }

    fn group(id: &str, accounts: &[&str]) -> Group {
        Group {
            id: GroupId::new(id),
            name: id.to_string(),
            accounts: accounts
                .iter()
                .map(|a| AccountSummary {
                    id: None,
                    account_id: AccountId::new(*a),
                    mask: None,
                    current: None,
                    available: None,
                })
                .collect(),
            is_selected: false,
            total_current_balance: Money::zero(),
            total_available_balance: Money::zero(),
        }
    }

    #[test]
    fn ungrouped_tab_shows_everything() {
        let tab = Tab::new(TabId::new("all"), "All");
        assert!(tab.shows(&tx("anything"), &[]));
    }

    #[test]
    fn grouped_tab_shows_only_member_accounts() {
        let mut tab = Tab::new(TabId::new("biz"), "Business");
        tab.show_for_group.insert(GroupId::new("g-biz"));
        let groups = vec![group("g-biz", &["acc-biz"]), group("g-home", &["acc-home"])];
        assert!(tab.shows(&tx("acc-biz"), &groups));
        assert!(!tab.shows(&tx("acc-home"), &groups));
    }
}
