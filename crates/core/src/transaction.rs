use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::id::{AccountId, ItemId, TransactionId};
use super::money::Money;
use super::rule::ValidationError;

/// A synced transaction. Only `category` is ever rewritten after sync, and
/// only by the rule pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(alias = "_id", alias = "transaction_id")]
    pub id: TransactionId,
    pub amount: Money,
    #[serde(default)]
    pub category: String,
    pub date: NaiveDate,
    pub name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(alias = "account_id")]
    pub account_id: AccountId,
    #[serde(alias = "item_id")]
    pub item_id: ItemId,
}

/// A transaction field a rule can inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Property {
    Amount,
    Category,
    Date,
    Name,
    Notes,
    AccountId,
    ItemId,
}

impl Property {
    pub fn as_str(self) -> &'static str {
        match self {
            Property::Amount => "amount",
            Property::Category => "category",
            Property::Date => "date",
            Property::Name => "name",
            Property::Notes => "notes",
            Property::AccountId => "accountId",
            Property::ItemId => "itemId",
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Property {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "amount" => Ok(Property::Amount),
            "category" => Ok(Property::Category),
            "date" => Ok(Property::Date),
            "name" => Ok(Property::Name),
            "notes" => Ok(Property::Notes),
            "accountId" | "account_id" => Ok(Property::AccountId),
            "itemId" | "item_id" => Ok(Property::ItemId),
            other => Err(ValidationError::UnknownProperty(other.to_string())),
        }
    }
}

impl Transaction {
    /// The string form of a field, as fed to rule comparisons.
    pub fn value_of(&self, property: Property) -> String {
        match property {
            Property::Amount => self.amount.to_plain_string(),
            Property::Category => self.category.clone(),
            Property::Date => self.date.format("%Y-%m-%d").to_string(),
            Property::Name => self.name.clone(),
            Property::Notes => self.notes.clone(),
            Property::AccountId => self.account_id.to_string(),
            Property::ItemId => self.item_id.to_string(),
        }
    }
}
