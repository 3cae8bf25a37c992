use std::collections::{BTreeMap, BTreeSet, HashMap};
use tabsync_core::{Group, Rule, Tab, TabId, TabRef, Transaction};

use crate::processor::{ProcessedView, TabRuleProcessor};

/// The user's tabs, groups, rules and transactions, plus the processed view
/// of every tab.
///
/// Mutation goes through [`crate::RuleLifecycleManager`] and the sync
/// orchestrator. Views are always rebuilt from scratch, never patched.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    tabs: Vec<Tab>,
    groups: Vec<Group>,
    rules: Vec<Rule>,
    transactions: Vec<Transaction>,
    views: BTreeMap<TabId, ProcessedView>,
}

impl Workspace {
    pub fn new(tabs: Vec<Tab>, groups: Vec<Group>) -> Self {
        Self {
            tabs,
            groups,
            ..Default::default()
        }
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn view(&self, tab: &TabId) -> Option<&ProcessedView> {
        self.views.get(tab)
    }

    pub fn tab_ids(&self) -> BTreeSet<TabId> {
        self.tabs.iter().map(|t| t.id.clone()).collect()
    }

    pub fn has_tab(&self, tab: &TabId) -> bool {
        self.tabs.iter().any(|t| &t.id == tab)
    }

    pub(crate) fn rules_mut(&mut self) -> &mut Vec<Rule> {
        &mut self.rules
    }

    pub(crate) fn set_rules(&mut self, rules: Vec<Rule>) {
        self.rules = rules;
    }

    pub fn add_tab(&mut self, tab: Tab) {
        self.tabs.retain(|t| t.id != tab.id);
        let id = tab.id.clone();
        self.tabs.push(tab);
        self.refresh_tab(&id);
    }

    /// Removes the tab and its view. Rules naming the tab are kept as they
    /// are; see [`Workspace::orphaned_rules`].
    pub fn remove_tab(&mut self, tab: &TabId) -> Option<Tab> {
        let index = self.tabs.iter().position(|t| &t.id == tab)?;
        let removed = self.tabs.remove(index);
        self.views.remove(tab);
        let orphaned = self.orphaned_rules();
        if !orphaned.is_empty() {
            tracing::warn!(
                tab = %tab,
                rules = orphaned.len(),
                "Removed tab is still referenced by rules"
            );
        }
        Some(removed)
    }

    /// Rules whose scope names a tab that no longer exists.
    pub fn orphaned_rules(&self) -> Vec<&Rule> {
        let known = self.tab_ids();
        self.rules
            .iter()
            .filter(|rule| {
                rule.apply_for_tabs.iter().any(|r| match r {
                    TabRef::Global => false,
                    TabRef::Tab(id) => !known.contains(id),
                })
            })
            .collect()
    }

    /// Transactions in the tab's group scope, before any rule runs.
    pub fn transactions_for_tab(&self, tab: &TabId) -> Vec<Transaction> {
        match self.tabs.iter().find(|t| &t.id == tab) {
            Some(tab) => self
                .transactions
                .iter()
                .filter(|tx| tab.shows(tx, &self.groups))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Inserts new transactions and replaces existing ones with the same id.
    /// Returns how many were new. Views are not refreshed.
    pub fn upsert_transactions(&mut self, incoming: Vec<Transaction>) -> usize {
        let mut index: HashMap<_, usize> = self
            .transactions
            .iter()
            .enumerate()
            .map(|(i, tx)| (tx.id.clone(), i))
            .collect();
        let mut added = 0;
        for tx in incoming {
            match index.get(&tx.id) {
                Some(&i) => self.transactions[i] = tx,
                None => {
                    index.insert(tx.id.clone(), self.transactions.len());
                    self.transactions.push(tx);
                    added += 1;
                }
            }
        }
        added
    }

    /// Rebuilds one tab's view. Unknown tabs are skipped.
    pub fn refresh_tab(&mut self, tab: &TabId) -> Option<&ProcessedView> {
        if !self.has_tab(tab) {
            tracing::debug!(tab = %tab, "Skipping refresh of unknown tab");
            return None;
        }
        let input = self.transactions_for_tab(tab);
        let view = TabRuleProcessor::new(&self.rules).process(tab, &input);
        self.views.insert(tab.clone(), view);
        self.views.get(tab)
    }

    pub fn refresh_tabs<'t>(&mut self, tabs: impl IntoIterator<Item = &'t TabId>) {
        for tab in tabs {
            self.refresh_tab(tab);
        }
    }

    pub fn refresh_all(&mut self) {
        let ids = self.tab_ids();
        self.refresh_tabs(&ids);
    }
}
