use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Declaration binding a business tag key to a node on an environment.
///
/// Exactly one selector (`nodeId`, `tag`+`attribute`, `uuid`, `bytes`) must be set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MappingDesc {
    #[validate(length(min = 1, max = 256))]
    pub key: String,
    /// Requested namespace index; the live index may differ after renumbering.
    #[serde(default)]
    pub namespace_index: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
}

impl MappingDesc {
    pub fn numeric(key: impl Into<String>, namespace_index: u16, node_id: u16) -> Self {
        Self {
            key: key.into(),
            namespace_index,
            tag: None,
            attribute: None,
            node_id: Some(node_id),
            uuid: None,
            bytes: None,
        }
    }

    pub fn tagged(
        key: impl Into<String>,
        namespace_index: u16,
        tag: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            namespace_index,
            tag: Some(tag.into()),
            attribute: Some(attribute.into()),
            node_id: None,
            uuid: None,
            bytes: None,
        }
    }
}

/// Identity of a model on one environment, rendered as `name@env`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    pub name: String,
    pub env: String,
}

impl ModelKey {
    pub fn new(name: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env: env.into(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.env)
    }
}

/// Declared mapping set of a model on one environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMeta {
    pub name: String,
    pub env: String,
    pub mappings: Vec<MappingDesc>,
}

impl ModelMeta {
    pub fn key(&self) -> ModelKey {
        ModelKey::new(&self.name, &self.env)
    }

    pub fn mapping(&self, key: &str) -> Option<&MappingDesc> {
        self.mappings.iter().find(|m| m.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_camel_case_and_defaults_namespace() {
        let raw = r#"{"key":"temp","tag":"boiler","attribute":"temp"}"#;
        let m: MappingDesc = serde_json::from_str(raw).unwrap();
        assert_eq!(m.namespace_index, 0);
        assert_eq!(m.tag.as_deref(), Some("boiler"));

        let raw = r#"{"key":"p","namespaceIndex":2,"nodeId":15}"#;
        let m: MappingDesc = serde_json::from_str(raw).unwrap();
        assert_eq!(m, MappingDesc::numeric("p", 2, 15));
    }

    #[test]
    fn blank_key_fails_validation() {
        let m = MappingDesc::numeric("", 2, 15);
        assert!(m.validate().is_err());
    }

    #[test]
    fn model_key_display() {
        assert_eq!(ModelKey::new("boiler", "iot").to_string(), "boiler@iot");
    }
}
