use std::collections::{BTreeSet, HashSet};
use tabsync_core::{Rule, RuleDraft, RuleId, RulePatch, RuleType, TabId, TabRef, ValidationError};
use tabsync_storage::{RuleStore, StoreError};
use thiserror::Error;

use crate::workspace::Workspace;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Invalid rule: {0}")]
    Validation(#[from] ValidationError),
    #[error("Rule must apply to GLOBAL or at least one tab")]
    EmptyScope,
    #[error("Rule not found: {0}")]
    NotFound(RuleId),
    #[error("Unknown tab: {0}")]
    UnknownTab(TabId),
    #[error("Rule {id} is a {found} rule, expected {expected}")]
    TypeMismatch {
        id: RuleId,
        expected: RuleType,
        found: RuleType,
    },
    #[error("Rule {0} listed more than once")]
    DuplicateId(RuleId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates, edits and removes rules, keeping the store, the workspace's rule
/// list and every affected tab view consistent.
///
/// Each operation writes to the store first. The workspace only changes once
/// the store has accepted the write, and affected tabs are reprocessed before
/// the call returns.
pub struct RuleLifecycleManager<'a, S: RuleStore + ?Sized> {
    store: &'a S,
    workspace: &'a mut Workspace,
}

impl<'a, S: RuleStore + ?Sized> RuleLifecycleManager<'a, S> {
    pub fn new(store: &'a S, workspace: &'a mut Workspace) -> Self {
        Self { store, workspace }
    }

    pub fn workspace(&self) -> &Workspace {
        &*self.workspace
    }

    /// Replaces the workspace's rules with the store's and rebuilds every view.
    pub async fn load(&mut self) -> Result<usize, RuleError> {
        let rules = self.store.list_rules().await?;
        let count = rules.len();
        self.workspace.set_rules(rules);
        self.workspace.refresh_all();
        tracing::info!(rules = count, "Loaded rules");
        for orphan in self.workspace.orphaned_rules() {
            tracing::warn!(rule = ?orphan.id, "Rule references a tab that no longer exists");
        }
        Ok(count)
    }

    /// Persists a completed draft. The draft never reaches the store while
    /// any required field is empty. The new rule runs after every existing
    /// rule of its type.
    pub async fn create(
        &mut self,
        draft: &RuleDraft,
        scope: BTreeSet<TabRef>,
    ) -> Result<Rule, RuleError> {
        let kind = draft.complete()?;
        self.check_scope(&scope)?;

        let rule_type = kind.rule_type();
        let order = self
            .workspace
            .rules()
            .iter()
            .filter(|r| r.rule_type() == rule_type)
            .map(|r| r.order_of_execution)
            .max()
            .map_or(0, |max| max + 1);

        let created = self
            .store
            .create_rule(&Rule::new(kind, scope, order))
            .await?;
        tracing::info!(rule = ?created.id, %rule_type, order, "Created rule");

        let affected = self.affected_tabs(&created.apply_for_tabs, None);
        self.workspace.rules_mut().push(created.clone());
        self.workspace.refresh_tabs(&affected);
        Ok(created)
    }

    pub async fn update(&mut self, id: &RuleId, patch: RulePatch) -> Result<Rule, RuleError> {
        let before = self.find(id)?.clone();
        if patch.is_empty() {
            return Ok(before);
        }
        if let Some(scope) = &patch.apply_for_tabs {
            self.check_scope(scope)?;
        }
        self.persist(id, &before, patch).await
    }

    pub async fn delete(&mut self, id: &RuleId) -> Result<(), RuleError> {
        let before = self.find(id)?.clone();
        self.store.delete_rule(id).await?;
        tracing::info!(rule = %id, "Deleted rule");

        self.workspace
            .rules_mut()
            .retain(|r| r.id.as_ref() != Some(id));
        let affected = self.affected_tabs(&before.apply_for_tabs, None);
        self.workspace.refresh_tabs(&affected);
        Ok(())
    }

    /// Renumbers the listed rules of one type to `0..n` in the given order.
    ///
    /// Only rules whose position changes are written. If the store rejects a
    /// write part way through, the moves it already accepted are kept so the
    /// workspace mirrors the store, and the error is returned.
    pub async fn reorder(&mut self, rule_type: RuleType, ids: &[RuleId]) -> Result<(), RuleError> {
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id) {
                return Err(RuleError::DuplicateId(id.clone()));
            }
            let found = self.find(id)?.rule_type();
            if found != rule_type {
                return Err(RuleError::TypeMismatch {
                    id: id.clone(),
                    expected: rule_type,
                    found,
                });
            }
        }

        let mut affected = BTreeSet::new();
        let mut result = Ok(());
        for (position, id) in ids.iter().enumerate() {
            let order = position as i64;
            let current = self.find(id)?;
            if current.order_of_execution == order {
                continue;
            }
            affected.extend(self.affected_tabs(&current.apply_for_tabs, None));
            let patch = RulePatch {
                order_of_execution: Some(order),
                ..Default::default()
            };
            match self.store.update_rule(id, &patch).await {
                Ok(updated) => self.replace(updated),
                Err(e) => {
                    tracing::warn!(rule = %id, error = %e, "Reorder stopped part way");
                    result = Err(e.into());
                    break;
                }
            }
        }
        self.workspace.refresh_tabs(&affected);
        result
    }

    /// Turning a rule global replaces its scope with `GLOBAL`. Turning a
    /// global rule off expands it to every current tab, so its effect is
    /// unchanged until tabs are removed from it.
    pub async fn toggle_global(&mut self, id: &RuleId, is_global: bool) -> Result<Rule, RuleError> {
        let before = self.find(id)?.clone();
        if before.is_global() == is_global {
            return Ok(before);
        }
        let scope: BTreeSet<TabRef> = if is_global {
            BTreeSet::from([TabRef::Global])
        } else {
            self.all_tabs()
        };
        self.persist_scope(id, &before, scope).await
    }

    /// Adds or removes one tab from a rule's scope. Removing a tab from a
    /// global rule rewrites the scope as every other tab, dropping `GLOBAL`.
    /// A rule's last tab cannot be removed; delete the rule instead.
    pub async fn toggle_tab_membership(
        &mut self,
        id: &RuleId,
        tab: &TabId,
        enable: bool,
    ) -> Result<Rule, RuleError> {
        if !self.workspace.has_tab(tab) {
            return Err(RuleError::UnknownTab(tab.clone()));
        }
        let before = self.find(id)?.clone();
        let entry = TabRef::from(tab);

        let scope = match (enable, before.is_global()) {
            (true, true) => return Ok(before),
            (true, false) => {
                let mut scope = before.apply_for_tabs.clone();
                scope.insert(entry);
                scope
            }
            (false, true) => {
                let mut scope = self.all_tabs();
                scope.remove(&entry);
                scope
            }
            (false, false) => {
                let mut scope = before.apply_for_tabs.clone();
                scope.remove(&entry);
                scope
            }
        };
        if scope == before.apply_for_tabs {
            return Ok(before);
        }
        self.persist_scope(id, &before, scope).await
    }

    async fn persist_scope(
        &mut self,
        id: &RuleId,
        before: &Rule,
        scope: BTreeSet<TabRef>,
    ) -> Result<Rule, RuleError> {
        self.check_scope(&scope)?;
        let patch = RulePatch {
            apply_for_tabs: Some(scope),
            ..Default::default()
        };
        self.persist(id, before, patch).await
    }

    async fn persist(
        &mut self,
        id: &RuleId,
        before: &Rule,
        patch: RulePatch,
    ) -> Result<Rule, RuleError> {
        let updated = self.store.update_rule(id, &patch).await?;
        tracing::info!(rule = %id, "Updated rule");

        let affected = self.affected_tabs(&before.apply_for_tabs, Some(&updated.apply_for_tabs));
        self.replace(updated.clone());
        self.workspace.refresh_tabs(&affected);
        Ok(updated)
    }

    fn find(&self, id: &RuleId) -> Result<&Rule, RuleError> {
        self.workspace
            .rules()
            .iter()
            .find(|r| r.id.as_ref() == Some(id))
            .ok_or_else(|| RuleError::NotFound(id.clone()))
    }

    fn replace(&mut self, updated: Rule) {
        let Some(id) = updated.id.clone() else {
            return;
        };
        if let Some(slot) = self
            .workspace
            .rules_mut()
            .iter_mut()
            .find(|r| r.id.as_ref() == Some(&id))
        {
            *slot = updated;
        }
    }

    fn check_scope(&self, scope: &BTreeSet<TabRef>) -> Result<(), RuleError> {
        if scope.is_empty() {
            return Err(RuleError::EmptyScope);
        }
        for entry in scope {
            if let TabRef::Tab(tab) = entry {
                if !self.workspace.has_tab(tab) {
                    return Err(RuleError::UnknownTab(tab.clone()));
                }
            }
        }
        Ok(())
    }

    fn all_tabs(&self) -> BTreeSet<TabRef> {
        self.workspace.tab_ids().into_iter().map(TabRef::Tab).collect()
    }

    /// Every tab when either scope is global, otherwise the tabs either
    /// scope names.
    fn affected_tabs(
        &self,
        before: &BTreeSet<TabRef>,
        after: Option<&BTreeSet<TabRef>>,
    ) -> BTreeSet<TabId> {
        let scopes = std::iter::once(before).chain(after);
        let mut tabs = BTreeSet::new();
        for scope in scopes {
            for entry in scope {
                match entry {
                    TabRef::Global => return self.workspace.tab_ids(),
                    TabRef::Tab(id) => {
                        tabs.insert(id.clone());
                    }
                }
            }
        }
        tabs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tabsync_core::{
        AccountId, ItemId, Money, Property, RuleKind, Tab, Transaction, TransactionId,
    };
    use tabsync_storage::MemoryRuleStore;

    fn tab_ids(names: &[&str]) -> BTreeSet<TabRef> {
        names.iter().map(|n| TabRef::Tab(TabId::new(*n))).collect()
    }

    fn global() -> BTreeSet<TabRef> {
        BTreeSet::from([TabRef::Global])
    }

    fn workspace() -> Workspace {
        let mut ws = Workspace::new(
            vec![
                Tab::new(TabId::new("T1"), "One"),
                Tab::new(TabId::new("T2"), "Two"),
                Tab::new(TabId::new("T3"), "Three"),
            ],
            Vec::new(),
        );
        ws.upsert_transactions(vec![
            Transaction {
                id: TransactionId::new("a"),
                amount: Money::from_cents(4000),
                category: String::new(),
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                name: "STARBUCKS #123".to_string(),
                notes: String::new(),
                account_id: AccountId::new("acc-1"),
                item_id: ItemId::new("item-1"),
            },
            Transaction {
                id: TransactionId::new("b"),
                amount: Money::from_cents(6000),
                category: String::new(),
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                name: "Grocer".to_string(),
                notes: String::new(),
                account_id: AccountId::new("acc-1"),
                item_id: ItemId::new("item-1"),
            },
        ]);
        ws.refresh_all();
        ws
    }

    fn filter_draft(criterion: &str) -> RuleDraft {
        let mut draft = RuleDraft::new(RuleType::Filter);
        draft.property = "amount".to_string();
        draft.method = ">=".to_string();
        draft.criterion = criterion.to_string();
        draft
    }

    fn view_len(ws: &Workspace, tab: &str) -> usize {
        ws.view(&TabId::new(tab)).unwrap().transactions.len()
    }

    #[tokio::test]
    async fn incomplete_draft_never_reaches_store() {
        let store = MemoryRuleStore::new();
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);

        let mut draft = RuleDraft::new(RuleType::Categorize);
        draft.property = "name".to_string();
        draft.method = "includes".to_string();
        draft.criterion = "starbucks".to_string();

        let result = manager.create(&draft, global()).await;
        assert!(matches!(
            result,
            Err(RuleError::Validation(ValidationError::MissingField { field: "category", .. }))
        ));
        assert!(store.snapshot().is_empty());
        assert!(manager.workspace().rules().is_empty());
    }

    #[tokio::test]
    async fn create_reprocesses_scoped_tab_only() {
        let store = MemoryRuleStore::new();
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);

        let rule = manager
            .create(&filter_draft("50"), tab_ids(&["T1"]))
            .await
            .unwrap();
        assert_eq!(rule.id, Some(RuleId::new("rule-1")));
        assert_eq!(view_len(&ws, "T1"), 1);
        assert_eq!(view_len(&ws, "T2"), 2);
    }

    #[tokio::test]
    async fn create_appends_after_existing_rules_of_type() {
        let store = MemoryRuleStore::new();
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);

        let first = manager.create(&filter_draft("1"), global()).await.unwrap();
        let second = manager.create(&filter_draft("2"), global()).await.unwrap();
        let mut sort = RuleDraft::new(RuleType::Sort);
        sort.property = "date".to_string();
        let third = manager.create(&sort, global()).await.unwrap();

        assert_eq!(first.order_of_execution, 0);
        assert_eq!(second.order_of_execution, 1);
        assert_eq!(third.order_of_execution, 0);
    }

    #[tokio::test]
    async fn create_rejects_empty_or_unknown_scope() {
        let store = MemoryRuleStore::new();
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);

        assert!(matches!(
            manager.create(&filter_draft("1"), BTreeSet::new()).await,
            Err(RuleError::EmptyScope)
        ));
        assert!(matches!(
            manager.create(&filter_draft("1"), tab_ids(&["T9"])).await,
            Err(RuleError::UnknownTab(_))
        ));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn store_rejection_leaves_workspace_untouched() {
        let store = MemoryRuleStore::new();
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);
        let rule = manager.create(&filter_draft("50"), global()).await.unwrap();
        let id = rule.id.clone().unwrap();

        store.fail_next("duplicate value");
        let result = manager.toggle_global(&id, false).await;
        assert!(matches!(result, Err(RuleError::Store(StoreError::Rejected(_)))));
        assert!(manager.workspace().rules()[0].is_global());
        assert_eq!(view_len(&ws, "T3"), 1);
    }

    #[tokio::test]
    async fn toggling_tab_off_a_global_rule_keeps_other_tabs() {
        let store = MemoryRuleStore::new();
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);
        let rule = manager.create(&filter_draft("50"), global()).await.unwrap();
        let id = rule.id.unwrap();

        let updated = manager
            .toggle_tab_membership(&id, &TabId::new("T1"), false)
            .await
            .unwrap();
        assert_eq!(updated.apply_for_tabs, tab_ids(&["T2", "T3"]));
        assert_eq!(store.snapshot()[0].apply_for_tabs, tab_ids(&["T2", "T3"]));
        assert_eq!(view_len(&ws, "T1"), 2);
        assert_eq!(view_len(&ws, "T2"), 1);
        assert_eq!(view_len(&ws, "T3"), 1);
    }

    #[tokio::test]
    async fn toggle_global_round_trip() {
        let store = MemoryRuleStore::new();
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);
        let rule = manager
            .create(&filter_draft("50"), tab_ids(&["T2"]))
            .await
            .unwrap();
        let id = rule.id.unwrap();

        let on = manager.toggle_global(&id, true).await.unwrap();
        assert_eq!(on.apply_for_tabs, global());
        assert_eq!(view_len(&ws, "T1"), 1);

        let mut manager = RuleLifecycleManager::new(&store, &mut ws);
        let off = manager.toggle_global(&id, false).await.unwrap();
        assert_eq!(off.apply_for_tabs, tab_ids(&["T1", "T2", "T3"]));
        assert_eq!(view_len(&ws, "T1"), 1);
    }

    #[tokio::test]
    async fn enabling_a_tab_on_a_scoped_rule() {
        let store = MemoryRuleStore::new();
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);
        let id = manager
            .create(&filter_draft("50"), tab_ids(&["T1"]))
            .await
            .unwrap()
            .id
            .unwrap();

        let updated = manager
            .toggle_tab_membership(&id, &TabId::new("T3"), true)
            .await
            .unwrap();
        assert_eq!(updated.apply_for_tabs, tab_ids(&["T1", "T3"]));
        assert_eq!(view_len(&ws, "T3"), 1);
        assert_eq!(view_len(&ws, "T2"), 2);
    }

    #[tokio::test]
    async fn toggle_for_unknown_tab_fails() {
        let store = MemoryRuleStore::new();
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);
        let id = manager
            .create(&filter_draft("50"), global())
            .await
            .unwrap()
            .id
            .unwrap();
        assert!(matches!(
            manager
                .toggle_tab_membership(&id, &TabId::new("T9"), false)
                .await,
            Err(RuleError::UnknownTab(_))
        ));
    }

    #[tokio::test]
    async fn removing_the_last_tab_is_rejected() {
        let store = MemoryRuleStore::new();
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);
        let id = manager
            .create(&filter_draft("50"), tab_ids(&["T2"]))
            .await
            .unwrap()
            .id
            .unwrap();

        let result = manager
            .toggle_tab_membership(&id, &TabId::new("T2"), false)
            .await;
        assert!(matches!(result, Err(RuleError::EmptyScope)));
        assert_eq!(store.snapshot()[0].apply_for_tabs, tab_ids(&["T2"]));
        assert_eq!(manager.workspace().rules()[0].apply_for_tabs, tab_ids(&["T2"]));
        assert_eq!(view_len(&ws, "T2"), 1);
    }

    #[tokio::test]
    async fn update_changes_kind_and_reprocesses() {
        let store = MemoryRuleStore::new();
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);
        let id = manager
            .create(&filter_draft("50"), global())
            .await
            .unwrap()
            .id
            .unwrap();

        let kind = filter_draft("10").complete().unwrap();
        let updated = manager
            .update(
                &id,
                RulePatch {
                    kind: Some(kind),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.kind.condition().unwrap().property, Property::Amount);
        assert_eq!(view_len(&ws, "T1"), 2);
    }

    #[tokio::test]
    async fn delete_restores_views() {
        let store = MemoryRuleStore::new();
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);
        let id = manager
            .create(&filter_draft("50"), global())
            .await
            .unwrap()
            .id
            .unwrap();
        manager.delete(&id).await.unwrap();
        assert!(matches!(
            manager.delete(&id).await,
            Err(RuleError::NotFound(_))
        ));
        assert!(store.snapshot().is_empty());
        assert_eq!(view_len(&ws, "T2"), 2);
    }

    #[tokio::test]
    async fn reorder_changes_which_categorize_rule_wins() {
        let store = MemoryRuleStore::new();
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);
        let mut ids = Vec::new();
        for category in ["Coffee", "Treats"] {
            let mut draft = RuleDraft::new(RuleType::Categorize);
            draft.property = "name".to_string();
            draft.method = "includes".to_string();
            draft.criterion = "starbucks".to_string();
            draft.category = category.to_string();
            ids.push(manager.create(&draft, global()).await.unwrap().id.unwrap());
        }
        let category = |ws: &Workspace| {
            ws.view(&TabId::new("T1")).unwrap().transactions[0]
                .category
                .clone()
        };
        assert_eq!(category(manager.workspace()), "Coffee");

        ids.reverse();
        manager.reorder(RuleType::Categorize, &ids).await.unwrap();
        assert_eq!(category(&ws), "Treats");
    }

    #[tokio::test]
    async fn reorder_validates_ids() {
        let store = MemoryRuleStore::new();
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);
        let id = manager
            .create(&filter_draft("50"), global())
            .await
            .unwrap()
            .id
            .unwrap();

        assert!(matches!(
            manager.reorder(RuleType::Filter, &[id.clone(), id.clone()]).await,
            Err(RuleError::DuplicateId(_))
        ));
        assert!(matches!(
            manager.reorder(RuleType::Sort, &[id]).await,
            Err(RuleError::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn load_replaces_rules_and_builds_views() {
        let mut seeded = Rule::new(
            RuleKind::Sort {
                key: "-amount".parse().unwrap(),
            },
            global(),
            0,
        );
        seeded.id = Some(RuleId::new("r1"));
        let store = MemoryRuleStore::with_rules(vec![seeded]);
        let mut ws = workspace();
        let mut manager = RuleLifecycleManager::new(&store, &mut ws);

        assert_eq!(manager.load().await.unwrap(), 1);
        let view = ws.view(&TabId::new("T2")).unwrap();
        assert_eq!(view.transactions[0].id, TransactionId::new("b"));
    }
}
