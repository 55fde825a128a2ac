//! Boolean filter expressions and sort specifications
//!
//! The query engine treats a [`Predicate`] as an opaque value: it only
//! combines a caller's predicate with the identifier constraints it derives
//! from parent steps and forwards the result to the service.

use crate::identifier::{InstanceId, ViewId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boolean filter over a view's properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Predicate {
    And { all: Vec<Predicate> },
    Or { any: Vec<Predicate> },
    Not { inner: Box<Predicate> },
    Equals { property: String, value: Value },
    In { property: String, values: Vec<Value> },
    Range {
        property: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        gt: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        gte: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lt: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lte: Option<Value>,
    },
    Prefix { property: String, value: String },
    Exists { property: String },
    /// Instance has data in every listed view
    HasData { views: Vec<ViewId> },
    /// Instance identifier is one of `ids`
    IdIn { ids: Vec<InstanceId> },
    /// Direct relation `property` (single or list) points at any of `targets`
    References {
        property: String,
        targets: Vec<InstanceId>,
    },
}

impl Predicate {
    pub fn equals(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Equals {
            property: property.into(),
            value: value.into(),
        }
    }

    pub fn in_values(property: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::In {
            property: property.into(),
            values,
        }
    }

    pub fn prefix(property: impl Into<String>, value: impl Into<String>) -> Self {
        Predicate::Prefix {
            property: property.into(),
            value: value.into(),
        }
    }

    pub fn exists(property: impl Into<String>) -> Self {
        Predicate::Exists {
            property: property.into(),
        }
    }

    pub fn has_data(views: Vec<ViewId>) -> Self {
        Predicate::HasData { views }
    }

    pub fn id_in(ids: Vec<InstanceId>) -> Self {
        Predicate::IdIn { ids }
    }

    pub fn references(property: impl Into<String>, targets: Vec<InstanceId>) -> Self {
        Predicate::References {
            property: property.into(),
            targets,
        }
    }

    pub fn negate(self) -> Self {
        Predicate::Not {
            inner: Box::new(self),
        }
    }

    /// Conjunction of `self` and `other`, flattening nested `And`s
    pub fn and(self, other: Predicate) -> Self {
        let mut all = Vec::new();
        for predicate in [self, other] {
            match predicate {
                Predicate::And { all: inner } => all.extend(inner),
                p => all.push(p),
            }
        }
        Predicate::And { all }
    }

    /// Combine an optional caller predicate with an engine constraint
    pub fn and_optional(base: Option<&Predicate>, constraint: Predicate) -> Self {
        match base {
            Some(base) => base.clone().and(constraint),
            None => constraint,
        }
    }
}

/// Sort order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Sort a step's rows by a property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    pub property: String,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default)]
    pub nulls_first: bool,
}

impl SortSpec {
    pub fn ascending(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Ascending,
            nulls_first: false,
        }
    }

    pub fn descending(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Descending,
            nulls_first: false,
        }
    }

    pub fn with_nulls_first(mut self) -> Self {
        self.nulls_first = true;
        self
    }
}
