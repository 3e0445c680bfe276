use std::collections::BTreeMap;
use tag_gateway_error::{GatewayError, GatewayResult};
use tag_gateway_models::MappingDesc;
use tag_gateway_sdk::{Identifier, NodeAddress};

/// Turns mapping declarations into node addresses.
pub struct MappingResolver;

impl MappingResolver {
    /// Selector of `mapping`, independent of any namespace.
    ///
    /// Exactly one of `nodeId`, `tag`+`attribute`, `uuid`, `bytes` must be set.
    /// Half a tag selector counts as set and is rejected.
    pub fn identifier(mapping: &MappingDesc) -> GatewayResult<Identifier> {
        let tag_selected = mapping.tag.is_some() || mapping.attribute.is_some();
        let selected = [
            mapping.node_id.is_some(),
            tag_selected,
            mapping.uuid.is_some(),
            mapping.bytes.is_some(),
        ]
        .into_iter()
        .filter(|s| *s)
        .count();

        match selected {
            0 => {
                return Err(Self::invalid(
                    mapping,
                    "all of {nodeId, tag, uuid, bytes} are empty",
                ))
            }
            1 => {}
            _ => {
                return Err(Self::invalid(
                    mapping,
                    "more than one of {nodeId, tag, uuid, bytes} is set",
                ))
            }
        }

        if let Some(id) = mapping.node_id {
            return Ok(Identifier::Numeric(id as u32));
        }
        if tag_selected {
            return match (&mapping.tag, &mapping.attribute) {
                (Some(tag), Some(attribute)) if !tag.is_empty() && !attribute.is_empty() => {
                    Ok(Identifier::String(format!("{tag}.{attribute}")))
                }
                _ => Err(Self::invalid(mapping, "tag and attribute must both be set")),
            };
        }
        if let Some(uuid) = mapping.uuid {
            return Ok(Identifier::Guid(uuid));
        }
        match &mapping.bytes {
            Some(bytes) => Ok(Identifier::Opaque(bytes.as_bytes().to_vec())),
            None => Err(Self::invalid(mapping, "no selector")),
        }
    }

    /// Full address of `mapping` under the given (already resolved) namespace index.
    #[inline]
    pub fn resolve(mapping: &MappingDesc, namespace: u16) -> GatewayResult<NodeAddress> {
        Ok(NodeAddress::new(namespace, Self::identifier(mapping)?))
    }

    fn invalid(mapping: &MappingDesc, reason: &str) -> GatewayError {
        let mut fields = BTreeMap::new();
        fields.insert(mapping.key.clone(), format!("Validation error: {reason}"));
        GatewayError::validation(format!("Invalid mapping `{}`", mapping.key), fields)
    }
}
