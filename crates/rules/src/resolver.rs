use tabsync_core::{Rule, RuleType, TabId};

/// Picks the rules that apply to a scope out of the full rule list.
#[derive(Debug, Clone, Copy)]
pub struct RuleSetResolver<'a> {
    rules: &'a [Rule],
}

impl<'a> RuleSetResolver<'a> {
    pub fn new(rules: &'a [Rule]) -> Self {
        Self { rules }
    }

    /// Rules naming `tab` explicitly, then `GLOBAL` rules, each in stored
    /// order. A rule that is both scoped and global appears once, in the
    /// scoped group. No sorting by `order_of_execution` happens here.
    pub fn resolve_for_tab(&self, tab: &TabId) -> Vec<&'a Rule> {
        let scoped = self.rules.iter().filter(|r| r.is_scoped_to(tab));
        let global = self
            .rules
            .iter()
            .filter(|r| r.is_global() && !r.is_scoped_to(tab));
        scoped.chain(global).collect()
    }

    pub fn resolve_global(&self) -> Vec<&'a Rule> {
        self.rules.iter().filter(|r| r.is_global()).collect()
    }
}

/// Rules of one type, ascending by `order_of_execution`. The sort is stable,
/// so ties keep their resolved order.
pub fn of_type<'a>(rules: &[&'a Rule], rule_type: RuleType) -> Vec<&'a Rule> {
    let mut selected: Vec<&Rule> = rules
        .iter()
        .copied()
        .filter(|r| r.rule_type() == rule_type)
        .collect();
    selected.sort_by_key(|r| r.order_of_execution);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tabsync_core::{RuleId, RuleKind, TabRef};

    fn rule(id: &str, scope: &[&str], order: i64) -> Rule {
        let apply_for_tabs: BTreeSet<TabRef> =
            scope.iter().map(|s| TabRef::from(s.to_string())).collect();
        let mut rule = Rule::new(
            RuleKind::Sort {
                key: "date".parse().unwrap(),
            },
            apply_for_tabs,
            order,
        );
        rule.id = Some(RuleId::new(id));
        rule
    }

    fn ids(rules: &[&Rule]) -> Vec<String> {
        rules
            .iter()
            .map(|r| r.id.as_ref().unwrap().to_string())
            .collect()
    }

    #[test]
    fn tab_rules_come_before_global_rules() {
        let rules = vec![
            rule("g1", &["GLOBAL"], 0),
            rule("t1", &["tab-a"], 5),
            rule("other", &["tab-b"], 0),
            rule("g2", &["GLOBAL"], 1),
            rule("t2", &["tab-a", "tab-b"], 1),
        ];
        let resolved = RuleSetResolver::new(&rules).resolve_for_tab(&TabId::new("tab-a"));
        assert_eq!(ids(&resolved), vec!["t1", "t2", "g1", "g2"]);
    }

    #[test]
    fn rule_matching_both_scopes_is_not_duplicated() {
        let rules = vec![rule("both", &["GLOBAL", "tab-a"], 0), rule("g", &["GLOBAL"], 0)];
        let resolved = RuleSetResolver::new(&rules).resolve_for_tab(&TabId::new("tab-a"));
        assert_eq!(ids(&resolved), vec!["both", "g"]);
    }

    #[test]
    fn resolve_global_skips_scoped_rules() {
        let rules = vec![rule("g", &["GLOBAL"], 0), rule("t", &["tab-a"], 0)];
        assert_eq!(ids(&RuleSetResolver::new(&rules).resolve_global()), vec!["g"]);
    }

    #[test]
    fn unknown_tab_sees_only_global_rules() {
        let rules = vec![rule("g", &["GLOBAL"], 0), rule("t", &["tab-a"], 0)];
        let resolved = RuleSetResolver::new(&rules).resolve_for_tab(&TabId::new("tab-z"));
        assert_eq!(ids(&resolved), vec!["g"]);
    }

    #[test]
    fn of_type_sorts_stably_by_order() {
        let rules = vec![
            rule("a", &["GLOBAL"], 2),
            rule("b", &["GLOBAL"], 1),
            rule("c", &["GLOBAL"], 2),
        ];
        let refs: Vec<&Rule> = rules.iter().collect();
        assert_eq!(ids(&of_type(&refs, RuleType::Sort)), vec!["b", "a", "c"]);
        assert!(of_type(&refs, RuleType::Filter).is_empty());
    }
}
