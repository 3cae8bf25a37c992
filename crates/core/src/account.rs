use serde::{Deserialize, Serialize};

use super::id::{AccountId, GroupId};
use super::money::Money;

/// Balances as the provider reports them. `available` is absent for most
/// credit products.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderBalances {
    pub current: Option<Money>,
    pub available: Option<Money>,
    #[serde(default)]
    pub limit: Option<Money>,
    #[serde(default)]
    pub iso_currency_code: Option<String>,
}

/// A full account record as returned alongside an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAccount {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: Option<String>,
    pub account_id: AccountId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub official_name: Option<String>,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(rename = "type", default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub balances: ProviderBalances,
}

/// The slice of an account a group keeps: identity, mask and the two balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: Option<String>,
    pub account_id: AccountId,
    pub mask: Option<String>,
    pub current: Option<Money>,
    pub available: Option<Money>,
}

impl From<&ProviderAccount> for AccountSummary {
    fn from(account: &ProviderAccount) -> Self {
        AccountSummary {
            id: account.id.clone(),
            account_id: account.account_id.clone(),
            mask: account.mask.clone(),
            current: account.balances.current,
            available: account.balances.available,
        }
    }
}

/// A user-defined collection of accounts with aggregated balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(rename = "_id", alias = "id")]
    pub id: GroupId,
    pub name: String,
    pub accounts: Vec<AccountSummary>,
    #[serde(default)]
    pub is_selected: bool,
    pub total_current_balance: Money,
    pub total_available_balance: Money,
}

impl Group {
    /// Builds a group and derives both totals; missing balances count as zero.
    pub fn new(id: GroupId, name: &str, accounts: &[ProviderAccount]) -> Self {
        let accounts: Vec<AccountSummary> = accounts.iter().map(AccountSummary::from).collect();
        let mut group = Group {
            id,
            name: name.to_string(),
            accounts,
            is_selected: false,
            total_current_balance: Money::zero(),
            total_available_balance: Money::zero(),
        };
        group.recompute_totals();
        group
    }

    pub fn recompute_totals(&mut self) {
        self.total_current_balance = self.accounts.iter().filter_map(|a| a.current).sum();
        self.total_available_balance = self.accounts.iter().filter_map(|a| a.available).sum();
    }

    pub fn contains_account(&self, account_id: &AccountId) -> bool {
        self.accounts.iter().any(|a| &a.account_id == account_id)
    }
}
