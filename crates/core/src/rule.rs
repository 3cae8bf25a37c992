use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::id::{RuleId, TabId};
use super::transaction::Property;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{rule_type} rule is missing required field '{field}'")]
    MissingField {
        rule_type: RuleType,
        field: &'static str,
    },
    #[error("Unknown rule type: '{0}'")]
    UnknownRuleType(String),
    #[error("Unknown property: '{0}'")]
    UnknownProperty(String),
    #[error("Unknown method: '{0}'")]
    UnknownMethod(String),
    #[error("Unknown group key: '{0}'")]
    UnknownGroupKey(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleType {
    Categorize,
    Sort,
    Filter,
    GroupBy,
}

impl RuleType {
    /// Fields that must be non-empty before a rule of this type is persisted.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            RuleType::Categorize => &["property", "method", "criterion", "category"],
            RuleType::Filter => &["property", "method", "criterion"],
            RuleType::Sort | RuleType::GroupBy => &["property"],
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleType::Categorize => write!(f, "categorize"),
            RuleType::Sort => write!(f, "sort"),
            RuleType::Filter => write!(f, "filter"),
            RuleType::GroupBy => write!(f, "groupBy"),
        }
    }
}

impl FromStr for RuleType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "categorize" => Ok(RuleType::Categorize),
            "sort" => Ok(RuleType::Sort),
            "filter" => Ok(RuleType::Filter),
            "groupBy" | "group_by" => Ok(RuleType::GroupBy),
            other => Err(ValidationError::UnknownRuleType(other.to_string())),
        }
    }
}

/// Comparison used by filter and categorize rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    Gte,
    Gt,
    Lte,
    Lt,
    Eq,
    IsNot,
    Includes,
    Excludes,
    StartsWith,
    EndsWith,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Gte => ">=",
            Method::Gt => ">",
            Method::Lte => "<=",
            Method::Lt => "<",
            Method::Eq => "=",
            Method::IsNot => "is not",
            Method::Includes => "includes",
            Method::Excludes => "excludes",
            Method::StartsWith => "startsWith",
            Method::EndsWith => "endsWith",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">=" => Ok(Method::Gte),
            ">" => Ok(Method::Gt),
            "<=" => Ok(Method::Lte),
            "<" => Ok(Method::Lt),
            "=" => Ok(Method::Eq),
            "is not" => Ok(Method::IsNot),
            "includes" => Ok(Method::Includes),
            "excludes" => Ok(Method::Excludes),
            "startsWith" => Ok(Method::StartsWith),
            "endsWith" => Ok(Method::EndsWith),
            other => Err(ValidationError::UnknownMethod(other.to_string())),
        }
    }
}

impl TryFrom<String> for Method {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Method> for String {
    fn from(m: Method) -> Self {
        m.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub property: Property,
    pub method: Method,
    pub criterion: String,
}

/// Sort property; a leading `-` on the wire means descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub property: Property,
    pub descending: bool,
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "-{}", self.property)
        } else {
            write!(f, "{}", self.property)
        }
    }
}

impl FromStr for SortKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix('-') {
            Some(rest) => Ok(SortKey {
                property: rest.parse()?,
                descending: true,
            }),
            None => Ok(SortKey {
                property: s.parse()?,
                descending: false,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Category,
    Name,
    AccountId,
    Year,
    Quarter,
    Month,
    YearMonth,
    Day,
    Weekday,
}

impl GroupKey {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupKey::Category => "category",
            GroupKey::Name => "name",
            GroupKey::AccountId => "accountId",
            GroupKey::Year => "year",
            GroupKey::Quarter => "quarter",
            GroupKey::Month => "month",
            GroupKey::YearMonth => "year_month",
            GroupKey::Day => "day",
            GroupKey::Weekday => "weekday",
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "category" => Ok(GroupKey::Category),
            "name" => Ok(GroupKey::Name),
            "accountId" | "account_id" => Ok(GroupKey::AccountId),
            "year" => Ok(GroupKey::Year),
            "quarter" => Ok(GroupKey::Quarter),
            "month" => Ok(GroupKey::Month),
            "year_month" | "yearMonth" => Ok(GroupKey::YearMonth),
            "day" => Ok(GroupKey::Day),
            "weekday" => Ok(GroupKey::Weekday),
            other => Err(ValidationError::UnknownGroupKey(other.to_string())),
        }
    }
}

/// What a rule does. Each variant carries exactly the fields its type needs,
/// so a categorize rule always has a category and nothing else does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleKind {
    Categorize { condition: Condition, category: String },
    Filter { condition: Condition },
    Sort { key: SortKey },
    GroupBy { key: GroupKey },
}

impl RuleKind {
    pub fn rule_type(&self) -> RuleType {
        match self {
            RuleKind::Categorize { .. } => RuleType::Categorize,
            RuleKind::Filter { .. } => RuleType::Filter,
            RuleKind::Sort { .. } => RuleType::Sort,
            RuleKind::GroupBy { .. } => RuleType::GroupBy,
        }
    }

    pub fn condition(&self) -> Option<&Condition> {
        match self {
            RuleKind::Categorize { condition, .. } | RuleKind::Filter { condition } => {
                Some(condition)
            }
            RuleKind::Sort { .. } | RuleKind::GroupBy { .. } => None,
        }
    }
}

/// An entry of a rule's `applyForTabs`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TabRef {
    Global,
    Tab(TabId),
}

pub const GLOBAL: &str = "GLOBAL";

impl From<String> for TabRef {
    fn from(s: String) -> Self {
        if s == GLOBAL {
            TabRef::Global
        } else {
            TabRef::Tab(TabId(s))
        }
    }
}

impl From<TabRef> for String {
    fn from(r: TabRef) -> Self {
        match r {
            TabRef::Global => GLOBAL.to_string(),
            TabRef::Tab(id) => id.0,
        }
    }
}

impl From<&TabId> for TabRef {
    fn from(id: &TabId) -> Self {
        TabRef::Tab(id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RuleRecord", into = "RuleRecord")]
pub struct Rule {
    /// `None` until the store has assigned one.
    pub id: Option<RuleId>,
    pub kind: RuleKind,
    pub apply_for_tabs: BTreeSet<TabRef>,
    pub order_of_execution: i64,
    pub is_important: bool,
}

impl Rule {
    pub fn new(kind: RuleKind, apply_for_tabs: BTreeSet<TabRef>, order_of_execution: i64) -> Self {
        Rule {
            id: None,
            kind,
            apply_for_tabs,
            order_of_execution,
            is_important: false,
        }
    }

    pub fn rule_type(&self) -> RuleType {
        self.kind.rule_type()
    }

    pub fn is_global(&self) -> bool {
        self.apply_for_tabs.contains(&TabRef::Global)
    }

    /// True only when the tab is named explicitly, regardless of `GLOBAL`.
    pub fn is_scoped_to(&self, tab: &TabId) -> bool {
        self.apply_for_tabs.contains(&TabRef::from(tab))
    }

    pub fn apply_patch(&mut self, patch: &RulePatch) {
        if let Some(kind) = &patch.kind {
            self.kind = kind.clone();
        }
        if let Some(tabs) = &patch.apply_for_tabs {
            self.apply_for_tabs = tabs.clone();
        }
        if let Some(order) = patch.order_of_execution {
            self.order_of_execution = order;
        }
        if let Some(important) = patch.is_important {
            self.is_important = important;
        }
    }
}

/// A partial update sent to `PUT rules/{id}`. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(into = "RulePatchRecord")]
pub struct RulePatch {
    pub kind: Option<RuleKind>,
    pub apply_for_tabs: Option<BTreeSet<TabRef>>,
    pub order_of_execution: Option<i64>,
    pub is_important: Option<bool>,
}

impl RulePatch {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.apply_for_tabs.is_none()
            && self.order_of_execution.is_none()
            && self.is_important.is_none()
    }
}

/// A rule still being filled in. Lives only on the client; becomes a
/// [`Rule`] once [`RuleDraft::complete`] succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDraft {
    pub local_id: Uuid,
    pub rule_type: RuleType,
    pub property: String,
    pub method: String,
    pub criterion: String,
    pub category: String,
}

impl RuleDraft {
    pub fn new(rule_type: RuleType) -> Self {
        RuleDraft {
            local_id: Uuid::new_v4(),
            rule_type,
            property: String::new(),
            method: String::new(),
            criterion: String::new(),
            category: String::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete().is_ok()
    }

    pub fn complete(&self) -> Result<RuleKind, ValidationError> {
        parse_kind(
            self.rule_type,
            &self.property,
            &self.method,
            &self.criterion,
            &self.category,
        )
    }
}

fn parse_kind(
    rule_type: RuleType,
    property: &str,
    method: &str,
    criterion: &str,
    category: &str,
) -> Result<RuleKind, ValidationError> {
    for &field in rule_type.required_fields() {
        let value = match field {
            "property" => property,
            "method" => method,
            "criterion" => criterion,
            _ => category,
        };
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField { rule_type, field });
        }
    }

    let condition = || -> Result<Condition, ValidationError> {
        Ok(Condition {
            property: property.parse()?,
            method: method.parse()?,
            criterion: criterion.to_string(),
        })
    };

    Ok(match rule_type {
        RuleType::Categorize => RuleKind::Categorize {
            condition: condition()?,
            category: category.to_string(),
        },
        RuleType::Filter => RuleKind::Filter {
            condition: condition()?,
        },
        RuleType::Sort => RuleKind::Sort {
            key: property.parse()?,
        },
        RuleType::GroupBy => RuleKind::GroupBy {
            key: property.parse()?,
        },
    })
}

/// The flat wire shape of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRecord {
    #[serde(rename = "_id", alias = "id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RuleId>,
    pub rule_type: RuleType,
    #[serde(default)]
    pub property: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub criterion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub apply_for_tabs: BTreeSet<TabRef>,
    #[serde(default)]
    pub order_of_execution: i64,
    #[serde(default)]
    pub is_important: bool,
}

/// Flat fields of a [`RuleKind`]: `(ruleType, property, method, criterion, category)`.
fn flatten_kind(kind: &RuleKind) -> (RuleType, String, String, String, Option<String>) {
    match kind {
        RuleKind::Categorize {
            condition,
            category,
        } => (
            RuleType::Categorize,
            condition.property.to_string(),
            condition.method.to_string(),
            condition.criterion.clone(),
            Some(category.clone()),
        ),
        RuleKind::Filter { condition } => (
            RuleType::Filter,
            condition.property.to_string(),
            condition.method.to_string(),
            condition.criterion.clone(),
            None,
        ),
        RuleKind::Sort { key } => (
            RuleType::Sort,
            key.to_string(),
            String::new(),
            String::new(),
            None,
        ),
        RuleKind::GroupBy { key } => (
            RuleType::GroupBy,
            key.to_string(),
            String::new(),
            String::new(),
            None,
        ),
    }
}

impl TryFrom<RuleRecord> for Rule {
    type Error = ValidationError;

    fn try_from(r: RuleRecord) -> Result<Self, Self::Error> {
        let kind = parse_kind(
            r.rule_type,
            &r.property,
            &r.method,
            &r.criterion,
            r.category.as_deref().unwrap_or(""),
        )?;
        Ok(Rule {
            id: r.id,
            kind,
            apply_for_tabs: r.apply_for_tabs,
            order_of_execution: r.order_of_execution,
            is_important: r.is_important,
        })
    }
}

impl From<Rule> for RuleRecord {
    fn from(rule: Rule) -> Self {
        let (rule_type, property, method, criterion, category) = flatten_kind(&rule.kind);
        RuleRecord {
            id: rule.id,
            rule_type,
            property,
            method,
            criterion,
            category,
            apply_for_tabs: rule.apply_for_tabs,
            order_of_execution: rule.order_of_execution,
            is_important: rule.is_important,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct RulePatchRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    rule_type: Option<RuleType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    criterion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    apply_for_tabs: Option<BTreeSet<TabRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_of_execution: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_important: Option<bool>,
}

impl From<RulePatch> for RulePatchRecord {
    fn from(patch: RulePatch) -> Self {
        let mut record = RulePatchRecord {
            apply_for_tabs: patch.apply_for_tabs,
            order_of_execution: patch.order_of_execution,
            is_important: patch.is_important,
            ..Default::default()
        };
        if let Some(kind) = &patch.kind {
            let (rule_type, property, method, criterion, category) = flatten_kind(kind);
            record.rule_type = Some(rule_type);
            record.property = Some(property);
            record.method = Some(method);
            record.criterion = Some(criterion);
            record.category = category;
        }
        record
    }
}
