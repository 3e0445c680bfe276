use serde::Deserialize;
use std::collections::BTreeMap;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ModelPath {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ModelEnvPath {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(min = 1, max = 128))]
    pub env: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EnvPath {
    #[validate(length(min = 1, max = 128))]
    pub env: String,
}

/// Keys to subscribe; empty means every registered mapping.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Values to write, split by strictness.
///
/// Unknown `required` keys fail the whole request; unknown `optional` keys are skipped.
/// `null` values are ignored.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ValueUpdateRequest {
    #[serde(default)]
    pub required: BTreeMap<String, Option<f64>>,
    #[serde(default)]
    pub optional: BTreeMap<String, Option<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_update_accepts_nulls_and_missing_sections() {
        let raw = r#"{"required":{"a":1.5,"b":null}}"#;
        let req: ValueUpdateRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.required.get("a"), Some(&Some(1.5)));
        assert_eq!(req.required.get("b"), Some(&None));
        assert!(req.optional.is_empty());
    }

    #[test]
    fn path_validation() {
        let p = ModelEnvPath {
            name: String::new(),
            env: "iot".into(),
        };
        assert!(p.validate().is_err());
    }
}
