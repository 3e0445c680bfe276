use opcua::types::{
    ByteString, DataValue, Guid, Identifier as UaIdentifier, NodeId, StatusCode, UAString, Variant,
};
use tag_gateway_sdk::{
    DataSample, Identifier, NodeAddress, SampleValue, StatusClass, SubscriptionEvent, UaScalar,
};
use uuid::Uuid;

/// Conversions between the wire types of the OPC UA stack and the gateway's own model.
pub struct OpcUaCodec;

impl OpcUaCodec {
    #[inline]
    fn numeric_as_f64(value: &Variant) -> Option<f64> {
        match value {
            Variant::SByte(n) => Some(*n as f64),
            Variant::Byte(n) => Some(*n as f64),
            Variant::Int16(n) => Some(*n as f64),
            Variant::UInt16(n) => Some(*n as f64),
            Variant::Int32(n) => Some(*n as f64),
            Variant::UInt32(n) => Some(*n as f64),
            Variant::Int64(n) => Some(*n as f64),
            Variant::UInt64(n) => Some(*n as f64),
            Variant::Float(f) => Some(*f as f64),
            Variant::Double(f) => Some(*f),
            _ => None,
        }
    }

    fn variant_name(value: &Variant) -> &'static str {
        match value {
            Variant::Empty => "Empty",
            Variant::Boolean(_) => "Boolean",
            Variant::String(_) => "String",
            Variant::DateTime(_) => "DateTime",
            Variant::Guid(_) => "Guid",
            Variant::StatusCode(_) => "StatusCode",
            Variant::ByteString(_) => "ByteString",
            Variant::QualifiedName(_) => "QualifiedName",
            Variant::LocalizedText(_) => "LocalizedText",
            Variant::NodeId(_) => "NodeId",
            Variant::ExpandedNodeId(_) => "ExpandedNodeId",
            Variant::ExtensionObject(_) => "ExtensionObject",
            Variant::Array(_) => "Array",
            _ => "Other",
        }
    }

    /// Narrow a variant to the sample payload the gateway understands.
    pub fn sample_value(value: Option<&Variant>) -> SampleValue {
        match value {
            None | Some(Variant::Empty) => SampleValue::Empty,
            Some(Variant::String(s)) => {
                if s.is_null() {
                    SampleValue::Empty
                } else {
                    SampleValue::Text(s.as_ref().to_string())
                }
            }
            Some(v) => match Self::numeric_as_f64(v) {
                Some(n) => SampleValue::Number(n),
                None => SampleValue::Unsupported(Self::variant_name(v).to_string()),
            },
        }
    }

    /// Missing status means Good on the wire.
    #[inline]
    pub fn status_class(status: Option<StatusCode>) -> StatusClass {
        match status {
            None => StatusClass::Good,
            Some(s) if s.is_good() => StatusClass::Good,
            Some(s) if s.is_uncertain() => StatusClass::Uncertain,
            Some(_) => StatusClass::Bad,
        }
    }

    pub fn data_sample(dv: &DataValue) -> DataSample {
        DataSample {
            value: Self::sample_value(dv.value.as_ref()),
            status: Self::status_class(dv.status),
            source_timestamp: dv.source_timestamp.as_ref().map(|t| t.as_chrono()),
            server_timestamp: dv.server_timestamp.as_ref().map(|t| t.as_chrono()),
        }
    }

    pub fn node_id(address: &NodeAddress) -> NodeId {
        let identifier = match &address.identifier {
            Identifier::Numeric(v) => UaIdentifier::Numeric(*v),
            Identifier::String(v) => UaIdentifier::String(UAString::from(v.as_str())),
            Identifier::Guid(v) => UaIdentifier::Guid(Guid::from_bytes(*v.as_bytes())),
            Identifier::Opaque(v) => UaIdentifier::ByteString(ByteString::from(v.clone())),
        };
        NodeId {
            namespace: address.namespace,
            identifier,
        }
    }

    pub fn node_address(node: &NodeId) -> NodeAddress {
        let identifier = match &node.identifier {
            UaIdentifier::Numeric(v) => Identifier::Numeric(*v),
            UaIdentifier::String(v) => Identifier::String(v.as_ref().to_string()),
            UaIdentifier::Guid(v) => Identifier::Guid(Uuid::from_bytes(*v.as_bytes())),
            UaIdentifier::ByteString(v) => Identifier::Opaque(v.value.clone().unwrap_or_default()),
        };
        NodeAddress::new(node.namespace, identifier)
    }

    #[inline]
    pub fn scalar(value: UaScalar) -> Variant {
        match value {
            UaScalar::Int32(v) => Variant::Int32(v),
            UaScalar::Float(v) => Variant::Float(v),
        }
    }

    /// Translate a subscription status-change notification.
    pub fn status_event(status: StatusCode) -> SubscriptionEvent {
        if status == StatusCode::GoodSubscriptionTransferred {
            // the subscription moved sessions and is still being served
            SubscriptionEvent::StatusChanged(status.to_string())
        } else if status.is_good() {
            SubscriptionEvent::KeepAlive
        } else if status == StatusCode::BadTimeout {
            SubscriptionEvent::WatchdogElapsed
        } else if status == StatusCode::BadSubscriptionIdInvalid
            || status == StatusCode::BadNoSubscription
        {
            SubscriptionEvent::TransferFailed(status.to_string())
        } else {
            SubscriptionEvent::StatusChanged(status.to_string())
        }
    }
}

/// Coarse classification of monitored item failures for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MonitoredItemFailureKind {
    CapacityOrResources,
    Configuration,
    PermissionOrAuth,
    Other,
}

impl MonitoredItemFailureKind {
    #[inline]
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            MonitoredItemFailureKind::CapacityOrResources => "capacity_or_resources",
            MonitoredItemFailureKind::Configuration => "configuration",
            MonitoredItemFailureKind::PermissionOrAuth => "permission_or_auth",
            MonitoredItemFailureKind::Other => "other",
        }
    }
}

impl From<StatusCode> for MonitoredItemFailureKind {
    fn from(status: StatusCode) -> Self {
        if status == StatusCode::BadTooManyMonitoredItems
            || status == StatusCode::BadTooManyOperations
            || status == StatusCode::BadOutOfMemory
            || status == StatusCode::BadResourceUnavailable
        {
            MonitoredItemFailureKind::CapacityOrResources
        } else if status == StatusCode::BadNodeIdInvalid
            || status == StatusCode::BadNodeIdUnknown
            || status == StatusCode::BadAttributeIdInvalid
        {
            MonitoredItemFailureKind::Configuration
        } else if status == StatusCode::BadUserAccessDenied
            || status == StatusCode::BadNotReadable
        {
            MonitoredItemFailureKind::PermissionOrAuth
        } else {
            MonitoredItemFailureKind::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_variants_widen_to_f64() {
        assert_eq!(
            OpcUaCodec::sample_value(Some(&Variant::Int16(-3))),
            SampleValue::Number(-3.0)
        );
        assert_eq!(
            OpcUaCodec::sample_value(Some(&Variant::Float(1.5))),
            SampleValue::Number(1.5)
        );
        assert_eq!(
            OpcUaCodec::sample_value(Some(&Variant::UInt64(7))),
            SampleValue::Number(7.0)
        );
    }

    #[test]
    fn non_numeric_variants() {
        assert_eq!(OpcUaCodec::sample_value(None), SampleValue::Empty);
        assert_eq!(
            OpcUaCodec::sample_value(Some(&Variant::String(UAString::from("2.5")))),
            SampleValue::Text("2.5".into())
        );
        assert_eq!(
            OpcUaCodec::sample_value(Some(&Variant::Boolean(true))),
            SampleValue::Unsupported("Boolean".into())
        );
    }

    #[test]
    fn status_classes() {
        assert_eq!(OpcUaCodec::status_class(None), StatusClass::Good);
        assert_eq!(
            OpcUaCodec::status_class(Some(StatusCode::Good)),
            StatusClass::Good
        );
        assert_eq!(
            OpcUaCodec::status_class(Some(StatusCode::UncertainInitialValue)),
            StatusClass::Uncertain
        );
        assert_eq!(
            OpcUaCodec::status_class(Some(StatusCode::BadNodeIdUnknown)),
            StatusClass::Bad
        );
    }

    #[test]
    fn node_ids_convert_both_ways() {
        let addresses = [
            NodeAddress::numeric(2, 1001),
            NodeAddress::string(3, "boiler.temp"),
            NodeAddress::new(4, Identifier::Guid(Uuid::from_u128(0x1234))),
            NodeAddress::new(5, Identifier::Opaque(vec![0xde, 0xad])),
        ];
        for address in addresses {
            let node = OpcUaCodec::node_id(&address);
            assert_eq!(node.namespace, address.namespace);
            assert_eq!(OpcUaCodec::node_address(&node), address);
        }
    }

    #[test]
    fn scalars() {
        assert_eq!(OpcUaCodec::scalar(UaScalar::Int32(2)), Variant::Int32(2));
        assert_eq!(OpcUaCodec::scalar(UaScalar::Float(0.5)), Variant::Float(0.5));
    }

    #[test]
    fn subscription_status_events() {
        assert_eq!(
            OpcUaCodec::status_event(StatusCode::Good),
            SubscriptionEvent::KeepAlive
        );
        assert_eq!(
            OpcUaCodec::status_event(StatusCode::BadTimeout),
            SubscriptionEvent::WatchdogElapsed
        );
        assert!(matches!(
            OpcUaCodec::status_event(StatusCode::BadSubscriptionIdInvalid),
            SubscriptionEvent::TransferFailed(_)
        ));
        assert!(matches!(
            OpcUaCodec::status_event(StatusCode::GoodSubscriptionTransferred),
            SubscriptionEvent::StatusChanged(_)
        ));
        assert!(matches!(
            OpcUaCodec::status_event(StatusCode::BadShutdown),
            SubscriptionEvent::StatusChanged(_)
        ));
    }

    #[test]
    fn failure_kinds() {
        assert_eq!(
            MonitoredItemFailureKind::from(StatusCode::BadNodeIdUnknown).as_str(),
            "configuration"
        );
        assert_eq!(
            MonitoredItemFailureKind::from(StatusCode::BadTooManyMonitoredItems),
            MonitoredItemFailureKind::CapacityOrResources
        );
        assert_eq!(
            MonitoredItemFailureKind::from(StatusCode::BadUnexpectedError),
            MonitoredItemFailureKind::Other
        );
    }
}
