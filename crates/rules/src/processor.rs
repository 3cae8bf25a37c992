use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tabsync_core::period;
use tabsync_core::{
    GroupKey, Money, Property, Rule, RuleKind, RuleType, SortKey, TabId, Transaction,
    TransactionId,
};

use crate::engine;
use crate::resolver::{of_type, RuleSetResolver};

/// One bucket of a grouped view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub key: String,
    pub count: usize,
    pub total: Money,
    pub transactions: Vec<Transaction>,
}

/// A category assigned by a categorize rule that differs from the synced one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recategorization {
    pub transaction_id: TransactionId,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedView {
    pub tab_id: TabId,
    pub transactions: Vec<Transaction>,
    /// Present only when a groupBy rule applies to the tab.
    pub groups: Option<Vec<Bucket>>,
    pub recategorized: Vec<Recategorization>,
}

/// Runs a tab's rules over a transaction set: filter, categorize, sort,
/// then groupBy. Categorization has to precede sort and grouping because
/// both may read the assigned category.
#[derive(Debug, Clone, Copy)]
pub struct TabRuleProcessor<'a> {
    resolver: RuleSetResolver<'a>,
}

impl<'a> TabRuleProcessor<'a> {
    pub fn new(rules: &'a [Rule]) -> Self {
        Self {
            resolver: RuleSetResolver::new(rules),
        }
    }

    pub fn process(&self, tab_id: &TabId, transactions: &[Transaction]) -> ProcessedView {
        let rules = self.resolver.resolve_for_tab(tab_id);

        let filters = of_type(&rules, RuleType::Filter);
        let mut kept: Vec<Transaction> = transactions
            .iter()
            .filter(|tx| passes_filters(&filters, tx))
            .cloned()
            .collect();

        let recategorized = categorize(&of_type(&rules, RuleType::Categorize), &mut kept);

        for rule in of_type(&rules, RuleType::Sort) {
            if let RuleKind::Sort { key } = &rule.kind {
                kept.sort_by(|a, b| compare_by(key, a, b));
            }
        }

        // Only the last groupBy rule in execution order takes effect.
        let group_key = of_type(&rules, RuleType::GroupBy)
            .into_iter()
            .rev()
            .find_map(|rule| match &rule.kind {
                RuleKind::GroupBy { key } => Some(*key),
                _ => None,
            });
        let groups = group_key.map(|key| group_by(key, &kept));

        tracing::debug!(
            tab = %tab_id,
            rules = rules.len(),
            input = transactions.len(),
            kept = kept.len(),
            recategorized = recategorized.len(),
            "Processed tab"
        );

        ProcessedView {
            tab_id: tab_id.clone(),
            transactions: kept,
            groups,
            recategorized,
        }
    }
}

fn passes_filters(filters: &[&Rule], tx: &Transaction) -> bool {
    filters.iter().all(|rule| match &rule.kind {
        RuleKind::Filter { condition } => engine::matches(condition, tx),
        _ => true,
    })
}

fn categorize(rules: &[&Rule], transactions: &mut [Transaction]) -> Vec<Recategorization> {
    let mut changes = Vec::new();
    for tx in transactions.iter_mut() {
        let assigned = rules.iter().find_map(|rule| match &rule.kind {
            RuleKind::Categorize {
                condition,
                category,
            } if engine::matches(condition, &*tx) => Some(category),
            _ => None,
        });
        if let Some(category) = assigned {
            if &tx.category != category {
                tx.category = category.clone();
                changes.push(Recategorization {
                    transaction_id: tx.id.clone(),
                    category: category.clone(),
                });
            }
        }
    }
    changes
}

fn compare_by(key: &SortKey, a: &Transaction, b: &Transaction) -> Ordering {
    let ordering = match key.property {
        Property::Amount => a.amount.cmp(&b.amount),
        Property::Date => a.date.cmp(&b.date),
        Property::Category => a.category.cmp(&b.category),
        Property::Name => a.name.cmp(&b.name),
        Property::Notes => a.notes.cmp(&b.notes),
        Property::AccountId => a.account_id.cmp(&b.account_id),
        Property::ItemId => a.item_id.cmp(&b.item_id),
    };
    if key.descending {
        ordering.reverse()
    } else {
        ordering
    }
}

pub fn group_label(key: GroupKey, tx: &Transaction) -> String {
    match key {
        GroupKey::Category => tx.category.clone(),
        GroupKey::Name => tx.name.clone(),
        GroupKey::AccountId => tx.account_id.to_string(),
        GroupKey::Year => period::year_label(tx.date),
        GroupKey::Quarter => period::quarter_label(tx.date),
        GroupKey::Month => period::month_label(tx.date),
        GroupKey::YearMonth => period::year_month_label(tx.date),
        GroupKey::Day => period::day_label(tx.date),
        GroupKey::Weekday => period::weekday_label(tx.date),
    }
}

/// Buckets in order of first appearance, so a sorted input keeps its order.
fn group_by(key: GroupKey, transactions: &[Transaction]) -> Vec<Bucket> {
    let mut buckets: Vec<Bucket> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for tx in transactions {
        let label = group_label(key, tx);
        let slot = *index.entry(label.clone()).or_insert_with(|| {
            buckets.push(Bucket {
                key: label,
                count: 0,
                total: Money::zero(),
                transactions: Vec::new(),
            });
            buckets.len() - 1
        });
        let bucket = &mut buckets[slot];
        bucket.count += 1;
        bucket.total = bucket.total + tx.amount;
        bucket.transactions.push(tx.clone());
    }
    buckets
}
