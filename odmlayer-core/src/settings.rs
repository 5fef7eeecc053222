//! Query settings: the lookup operator allow-list and the reserved primary-key aliases.
//!
//! Settings are plain serde data, so they can be loaded from configuration files:
//!
//! ```ignore
//! use odmlayer::settings::OdmSettings;
//!
//! let settings = OdmSettings::from_json(r#"{
//!     "parsed_ids": ["id", "pk", "key"],
//!     "filter_operators": { "exact": "eq", "gt": "gt", "in": "in_" }
//! }"#)?;
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{OdmError, OdmResult};

/// Operator-catalog entry a lookup name maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LookupOperator {
    /// [`Q::eq`](crate::operators::Q::eq)
    #[serde(rename = "eq")]
    Eq,
    /// [`Q::neq`](crate::operators::Q::neq)
    #[serde(rename = "neq")]
    Neq,
    /// [`Q::contains`](crate::operators::Q::contains)
    #[serde(rename = "contains")]
    Contains,
    /// [`Q::icontains`](crate::operators::Q::icontains)
    #[serde(rename = "icontains")]
    IContains,
    /// [`Q::in_`](crate::operators::Q::in_)
    #[serde(rename = "in_")]
    In,
    /// [`Q::not_in`](crate::operators::Q::not_in)
    #[serde(rename = "not_in")]
    NotIn,
    /// [`Q::pattern`](crate::operators::Q::pattern)
    #[serde(rename = "pattern")]
    Pattern,
    /// [`Q::where_`](crate::operators::Q::where_)
    #[serde(rename = "where")]
    Where,
    /// [`Q::gte`](crate::operators::Q::gte)
    #[serde(rename = "gte")]
    Gte,
    /// [`Q::gt`](crate::operators::Q::gt)
    #[serde(rename = "gt")]
    Gt,
    /// [`Q::lt`](crate::operators::Q::lt)
    #[serde(rename = "lt")]
    Lt,
    /// [`Q::lte`](crate::operators::Q::lte)
    #[serde(rename = "lte")]
    Lte,
    /// [`Q::asc`](crate::operators::Q::asc)
    #[serde(rename = "asc")]
    Asc,
    /// [`Q::desc`](crate::operators::Q::desc)
    #[serde(rename = "desc")]
    Desc,
    /// [`Q::not_eq`](crate::operators::Q::not_eq)
    #[serde(rename = "not_")]
    Not,
    /// [`Q::exists`](crate::operators::Q::exists)
    #[serde(rename = "exists")]
    Exists,
}

/// How the lookup parser treats the value of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCategory {
    /// A single value compared against the field.
    Value,
    /// A list of values.
    List,
    /// An ordering comparison (`gt`, `gte`, `lt`, `lte`).
    Comparison,
    /// A sort clause; the value is a direction flag.
    Order,
}

impl LookupOperator {
    /// Returns the category used by the lookup parser to dispatch on.
    pub fn category(&self) -> OperatorCategory {
        match self {
            LookupOperator::In | LookupOperator::NotIn => OperatorCategory::List,
            LookupOperator::Gt | LookupOperator::Gte | LookupOperator::Lt | LookupOperator::Lte => {
                OperatorCategory::Comparison
            }
            LookupOperator::Asc | LookupOperator::Desc => OperatorCategory::Order,
            _ => OperatorCategory::Value,
        }
    }
}

/// Settings consulted by the lookup parser and the managers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdmSettings {
    /// Identifiers rewritten to the document's primary-key field.
    pub parsed_ids: Vec<String>,
    /// Lookup name to operator mapping, i.e. the operator allow-list.
    pub filter_operators: BTreeMap<String, LookupOperator>,
}

impl Default for OdmSettings {
    fn default() -> Self {
        let filter_operators = [
            ("exact", LookupOperator::Eq),
            ("neq", LookupOperator::Neq),
            ("contains", LookupOperator::Contains),
            ("icontains", LookupOperator::IContains),
            ("in", LookupOperator::In),
            ("not_in", LookupOperator::NotIn),
            ("pattern", LookupOperator::Pattern),
            ("where", LookupOperator::Where),
            ("gte", LookupOperator::Gte),
            ("gt", LookupOperator::Gt),
            ("lt", LookupOperator::Lt),
            ("lte", LookupOperator::Lte),
            ("asc", LookupOperator::Asc),
            ("desc", LookupOperator::Desc),
            ("not", LookupOperator::Not),
        ]
        .into_iter()
        .map(|(name, op)| (name.to_string(), op))
        .collect();

        Self {
            parsed_ids: vec!["id".to_string(), "pk".to_string()],
            filter_operators,
        }
    }
}

impl OdmSettings {
    /// Creates a builder starting from the default settings.
    pub fn builder() -> OdmSettingsBuilder {
        OdmSettingsBuilder::default()
    }

    /// Loads settings from a JSON document. Missing keys fall back to their defaults.
    pub fn from_json(json: &str) -> OdmResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolves a lookup name against the allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidOperator`] listing the valid operators.
    pub fn get_operator(&self, name: &str) -> OdmResult<LookupOperator> {
        self.filter_operators
            .get(name)
            .copied()
            .ok_or_else(|| OdmError::InvalidOperator {
                operator: name.to_string(),
                valid: self.stringified_operators(),
            })
    }

    /// Returns the valid lookup names.
    pub fn operators(&self) -> Vec<&str> {
        self.filter_operators
            .keys()
            .map(String::as_str)
            .collect()
    }

    /// Returns the valid lookup names joined by `, `.
    pub fn stringified_operators(&self) -> String {
        self.operators().join(", ")
    }

    /// Returns `true` if `name` is a reserved primary-key alias.
    pub fn is_parsed_id(&self, name: &str) -> bool {
        self.parsed_ids
            .iter()
            .any(|id| id == name)
    }
}

/// Builder for [`OdmSettings`].
#[derive(Debug, Default)]
pub struct OdmSettingsBuilder {
    settings: OdmSettings,
}

impl OdmSettingsBuilder {
    /// Replaces the reserved primary-key aliases.
    pub fn parsed_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.parsed_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Registers (or replaces) a lookup name.
    pub fn operator(mut self, name: impl Into<String>, operator: LookupOperator) -> Self {
        self.settings
            .filter_operators
            .insert(name.into(), operator);
        self
    }

    /// Removes a lookup name from the allow-list.
    pub fn without_operator(mut self, name: &str) -> Self {
        self.settings.filter_operators.remove(name);
        self
    }

    /// Builds the settings.
    pub fn build(self) -> OdmSettings {
        self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_lookup_table() {
        let settings = OdmSettings::default();

        assert_eq!(settings.filter_operators.len(), 15);
        assert_eq!(settings.get_operator("in").unwrap(), LookupOperator::In);
        assert_eq!(settings.get_operator("exact").unwrap(), LookupOperator::Eq);
        assert!(settings.is_parsed_id("pk"));
        assert!(!settings.is_parsed_id("_id"));
    }

    #[test]
    fn unknown_operator_lists_valid_ones() {
        let err = OdmSettings::default().get_operator("between").unwrap_err();

        match err {
            OdmError::InvalidOperator { operator, valid } => {
                assert_eq!(operator, "between");
                assert!(valid.contains("icontains"));
                assert!(valid.contains("not_in"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn loads_from_json() {
        let settings = OdmSettings::from_json(
            r#"{ "filter_operators": { "exact": "eq", "is": "eq", "present": "exists" } }"#,
        )
        .unwrap();

        assert_eq!(settings.parsed_ids, vec!["id", "pk"]);
        assert_eq!(settings.operators(), vec!["exact", "is", "present"]);
        assert_eq!(settings.get_operator("present").unwrap(), LookupOperator::Exists);

        assert!(OdmSettings::from_json(r#"{ "filter_operators": { "x": "nope" } }"#).is_err());
    }

    #[test]
    fn builder_overrides_defaults() {
        let settings = OdmSettings::builder()
            .parsed_ids(["key"])
            .operator("is", LookupOperator::Eq)
            .without_operator("where")
            .build();

        assert!(settings.is_parsed_id("key"));
        assert!(!settings.is_parsed_id("id"));
        assert!(settings.get_operator("is").is_ok());
        assert!(settings.get_operator("where").is_err());
        assert_eq!(
            LookupOperator::Desc.category(),
            OperatorCategory::Order
        );
    }
}
