//! Conversion of unpacked mappings into caller types

use lattice_core::RawMapping;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueryResult;

/// How strictly mappings are checked while constructing typed values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validation {
    /// Fail on the first mapping that does not fit `T`
    #[default]
    Strict,
    /// Skip mappings that do not fit, logging each one
    Unchecked,
}

pub fn construct<T: DeserializeOwned>(
    mappings: Vec<RawMapping>,
    validation: Validation,
) -> QueryResult<Vec<T>> {
    let total = mappings.len();
    let mut values = Vec::with_capacity(total);
    for mapping in mappings {
        let label = describe(&mapping);
        match serde_json::from_value::<T>(Value::Object(mapping)) {
            Ok(value) => values.push(value),
            Err(e) if validation == Validation::Unchecked => {
                tracing::warn!("Skipping {}: {}", label, e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    if values.len() < total {
        tracing::debug!("Constructed {} of {} mapping(s)", values.len(), total);
    }
    Ok(values)
}

fn describe(mapping: &RawMapping) -> String {
    match (
        mapping.get("space").and_then(Value::as_str),
        mapping.get("externalId").and_then(Value::as_str),
    ) {
        (Some(space), Some(external_id)) => format!("{}:{}", space, external_id),
        _ => "mapping without identifier".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Operator {
        external_id: String,
        name: String,
    }

    fn mappings() -> Vec<RawMapping> {
        [
            json!({"space": "s", "externalId": "op-1", "version": 1, "name": "Acme"}),
            json!({"space": "s", "externalId": "op-2", "version": 1}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
    }

    #[test]
    fn test_strict_fails_on_bad_mapping() {
        let result = construct::<Operator>(mappings(), Validation::Strict);
        assert!(matches!(result, Err(QueryError::Serialization(_))));
    }

    #[test]
    fn test_unchecked_skips_bad_mapping() {
        let operators: Vec<Operator> = construct(mappings(), Validation::Unchecked).unwrap();
        assert_eq!(
            operators,
            vec![Operator {
                external_id: "op-1".into(),
                name: "Acme".into()
            }]
        );
    }
}
