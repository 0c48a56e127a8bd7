//! Conversion between rumqttc property structs and control-plane messages.
//!
//! Inbound packets are translated field by field into the reply messages the
//! controller consumes; outbound request fields populate the rumqttc
//! property structs, which serialize in the canonical MQTT v5.0 property
//! order. User properties are carried as ordered lists in both directions:
//! brokers are allowed to rely on their order, so it is never changed here.
//!
//! Properties a session cannot express (v5-only fields on a 3.1.1 session,
//! packet properties the control plane has no field for) are logged at warn
//! level and skipped, never an error.

use rumqttc::mqttbytes::v4;
use rumqttc::v5::mqttbytes::v5::{
    ConnAckProperties, ConnectProperties, ConnectReturnCode, DisconnectProperties,
    DisconnectReasonCode, PubAckProperties, PubAckReason, PubCompProperties, PubCompReason,
    Publish, PublishProperties, SubAckProperties, SubscribeProperties, SubscribeReasonCode,
    UnsubAckProperties, UnsubscribeProperties,
};
use rumqttc::v5::mqttbytes::QoS as V5QoS;
use rumqttc::QoS as V3QoS;
use tracing::warn;

use crate::proto;

/// Normalized acknowledgement properties. PUBACK, PUBCOMP, SUBACK and
/// UNSUBACK all carry the same two fields; collapsing them keeps the pending
/// table independent of which packet completed the op.
#[derive(Debug, Clone, Default)]
pub struct AckProps {
    pub reason_string: Option<String>,
    pub user_properties: Vec<(String, String)>,
}

impl From<PubAckProperties> for AckProps {
    fn from(props: PubAckProperties) -> Self {
        Self {
            reason_string: props.reason_string,
            user_properties: props.user_properties,
        }
    }
}

impl From<PubCompProperties> for AckProps {
    fn from(props: PubCompProperties) -> Self {
        Self {
            reason_string: props.reason_string,
            user_properties: props.user_properties,
        }
    }
}

impl From<SubAckProperties> for AckProps {
    fn from(props: SubAckProperties) -> Self {
        Self {
            reason_string: props.reason_string,
            user_properties: props.user_properties,
        }
    }
}

impl From<UnsubAckProperties> for AckProps {
    fn from(props: UnsubAckProperties) -> Self {
        Self {
            reason_string: props.reason_string,
            user_properties: props.user_properties,
        }
    }
}

/// Ordered user-property pairs from control-plane form.
pub fn pairs_from_proto(props: &[proto::Mqtt5Properties]) -> Vec<(String, String)> {
    props
        .iter()
        .map(|p| (p.key.clone(), p.value.clone()))
        .collect()
}

/// Ordered user-property pairs into control-plane form.
pub fn pairs_to_proto(pairs: &[(String, String)]) -> Vec<proto::Mqtt5Properties> {
    pairs
        .iter()
        .map(|(key, value)| proto::Mqtt5Properties {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Outbound: control plane -> rumqttc
// ---------------------------------------------------------------------------

/// CONNECT properties for a v5 session.
pub fn connect_properties(
    user_properties: &[proto::Mqtt5Properties],
    request_response_information: Option<bool>,
) -> ConnectProperties {
    ConnectProperties {
        request_response_info: request_response_information.map(u8::from),
        user_properties: pairs_from_proto(user_properties),
        ..Default::default()
    }
}

/// PUBLISH properties from the control-plane message.
pub fn publish_properties(msg: &proto::Mqtt5Message) -> PublishProperties {
    PublishProperties {
        payload_format_indicator: msg.payload_format_indicator.map(u8::from),
        message_expiry_interval: msg.message_expiry_interval.map(|v| v as u32),
        response_topic: msg.response_topic.clone(),
        correlation_data: msg.correlation_data.clone().map(Into::into),
        user_properties: pairs_from_proto(&msg.properties),
        content_type: msg.content_type.clone(),
        ..Default::default()
    }
}

/// SUBSCRIBE properties: optional subscription identifier plus user
/// properties. The endpoint has already rejected subscription ids on 3.1.1
/// sessions.
pub fn subscribe_properties(
    subscription_id: Option<u32>,
    user_properties: &[proto::Mqtt5Properties],
) -> SubscribeProperties {
    let mut props = SubscribeProperties::default();
    props.id = subscription_id.map(|v| v as usize);
    props.user_properties = pairs_from_proto(user_properties);
    props
}

/// UNSUBSCRIBE properties.
pub fn unsubscribe_properties(
    user_properties: &[proto::Mqtt5Properties],
) -> UnsubscribeProperties {
    let mut props = UnsubscribeProperties::default();
    props.user_properties = pairs_from_proto(user_properties);
    props
}

/// Warn about CONNECT fields a 3.1.1 session cannot carry.
pub fn warn_v311_connect_drops(
    user_properties: &[proto::Mqtt5Properties],
    request_response_information: Option<bool>,
) {
    if !user_properties.is_empty() {
        warn!("dropping CONNECT user properties: not supported by MQTT v3.1.1");
    }
    if request_response_information.is_some() {
        warn!("dropping requestResponseInformation: not supported by MQTT v3.1.1");
    }
}

/// Warn about PUBLISH fields a 3.1.1 session cannot carry.
pub fn warn_v311_publish_drops(msg: &proto::Mqtt5Message) {
    if !msg.properties.is_empty() {
        warn!("dropping PUBLISH user properties: not supported by MQTT v3.1.1");
    }
    if msg.payload_format_indicator.is_some() {
        warn!("dropping payloadFormatIndicator: not supported by MQTT v3.1.1");
    }
    if msg.message_expiry_interval.is_some() {
        warn!("dropping messageExpiryInterval: not supported by MQTT v3.1.1");
    }
    if msg.response_topic.is_some() {
        warn!("dropping responseTopic: not supported by MQTT v3.1.1");
    }
    if msg.correlation_data.is_some() {
        warn!("dropping correlationData: not supported by MQTT v3.1.1");
    }
    if msg.content_type.is_some() {
        warn!("dropping contentType: not supported by MQTT v3.1.1");
    }
}

/// Warn about SUBSCRIBE/UNSUBSCRIBE fields a 3.1.1 session cannot carry.
pub fn warn_v311_subscription_drops(
    user_properties: &[proto::Mqtt5Properties],
    no_local: bool,
    retain_as_published: bool,
    retain_handling: u8,
) {
    if !user_properties.is_empty() {
        warn!("dropping user properties: not supported by MQTT v3.1.1");
    }
    if no_local || retain_as_published || retain_handling != 0 {
        warn!("dropping v5 subscription options: not supported by MQTT v3.1.1");
    }
}

// ---------------------------------------------------------------------------
// Inbound: rumqttc -> control plane
// ---------------------------------------------------------------------------

/// CONNACK into the control-plane reply.
pub fn connack_to_proto(
    reason_code: u8,
    session_present: bool,
    props: Option<&ConnAckProperties>,
) -> proto::Mqtt5ConnAck {
    let mut ack = proto::Mqtt5ConnAck {
        session_present,
        reason_code: i32::from(reason_code),
        ..Default::default()
    };

    if let Some(props) = props {
        ack.session_expiry_interval = props.session_expiry_interval.map(|v| v as i32);
        ack.receive_maximum = props.receive_max.map(i32::from);
        ack.maximum_qos = props.max_qos.map(i32::from);
        ack.retain_available = props.retain_available.map(|v| v != 0);
        ack.maximum_packet_size = props.max_packet_size.map(|v| v as i32);
        ack.assigned_client_id = props.assigned_client_identifier.clone();
        ack.reason_string = props.reason_string.clone();
        ack.wildcard_subscriptions_available =
            props.wildcard_subscription_available.map(|v| v != 0);
        ack.subscription_identifiers_available =
            props.subscription_identifiers_available.map(|v| v != 0);
        ack.shared_subscriptions_available = props.shared_subscription_available.map(|v| v != 0);
        ack.server_keep_alive = props.server_keep_alive.map(i32::from);
        ack.response_information = props.response_information.clone();
        ack.server_reference = props.server_reference.clone();
        ack.topic_alias_maximum = props.topic_alias_max.map(i32::from);
        ack.properties = pairs_to_proto(&props.user_properties);

        if props.authentication_method.is_some() || props.authentication_data.is_some() {
            warn!("unhandled CONNACK authentication properties, skipped");
        }
    }

    ack
}

/// PUBACK/PUBCOMP into the publish reply.
pub fn puback_to_proto(reason_code: u8, props: Option<&AckProps>) -> proto::MqttPublishReply {
    proto::MqttPublishReply {
        reason_code: i32::from(reason_code),
        reason_string: props.and_then(|p| p.reason_string.clone()),
        properties: props
            .map(|p| pairs_to_proto(&p.user_properties))
            .unwrap_or_default(),
    }
}

/// SUBACK/UNSUBACK user properties. The reply's reason codes come from the
/// granted-QoS array, and a reason string has no control-plane field here.
pub fn ack_user_properties(props: Option<&AckProps>) -> Vec<proto::Mqtt5Properties> {
    if let Some(props) = props {
        if let Some(reason) = &props.reason_string {
            warn!(reason, "unhandled reason string on acknowledgement, skipped");
        }
        pairs_to_proto(&props.user_properties)
    } else {
        Vec::new()
    }
}

/// Inbound v5 PUBLISH into the control-plane message.
pub fn publish_to_proto(publish: &Publish) -> proto::Mqtt5Message {
    let mut msg = proto::Mqtt5Message {
        topic: String::from_utf8_lossy(&publish.topic).into_owned(),
        payload: publish.payload.to_vec(),
        qos: i32::from(v5_qos_to_u8(publish.qos)),
        retain: publish.retain,
        ..Default::default()
    };

    if let Some(props) = &publish.properties {
        msg.payload_format_indicator = props.payload_format_indicator.map(|v| v != 0);
        msg.message_expiry_interval = props.message_expiry_interval.map(|v| v as i32);
        msg.response_topic = props.response_topic.clone();
        msg.correlation_data = props.correlation_data.as_ref().map(|data| data.to_vec());
        msg.content_type = props.content_type.clone();
        msg.properties = pairs_to_proto(&props.user_properties);

        if props.topic_alias.is_some() {
            warn!("unhandled PUBLISH property topicAlias, skipped");
        }
        if !props.subscription_identifiers.is_empty() {
            warn!("unhandled PUBLISH property subscriptionIdentifier, skipped");
        }
    }

    msg
}

/// Inbound 3.1.1 PUBLISH into the control-plane message. No properties on
/// the wire for this protocol version.
pub fn publish_v311_to_proto(publish: &v4::Publish) -> proto::Mqtt5Message {
    proto::Mqtt5Message {
        topic: publish.topic.clone(),
        payload: publish.payload.to_vec(),
        qos: i32::from(v3_qos_to_u8(publish.qos)),
        retain: publish.retain,
        ..Default::default()
    }
}

/// Broker DISCONNECT into the control-plane event payload.
pub fn disconnect_to_proto(
    reason_code: u8,
    props: Option<&DisconnectProperties>,
) -> proto::Mqtt5Disconnect {
    let mut disconnect = proto::Mqtt5Disconnect {
        reason_code: i32::from(reason_code),
        ..Default::default()
    };

    if let Some(props) = props {
        disconnect.session_expiry_interval = props.session_expiry_interval.map(|v| v as i32);
        disconnect.reason_string = props.reason_string.clone();
        disconnect.server_reference = props.server_reference.clone();
        disconnect.properties = pairs_to_proto(&props.user_properties);
    }

    disconnect
}

// ---------------------------------------------------------------------------
// Reason-code and QoS numeric mappings
// ---------------------------------------------------------------------------

/// QoS for a v5 client from a validated 0..=2 value.
pub fn v5_qos(qos: u8) -> Option<V5QoS> {
    match qos {
        0 => Some(V5QoS::AtMostOnce),
        1 => Some(V5QoS::AtLeastOnce),
        2 => Some(V5QoS::ExactlyOnce),
        _ => None,
    }
}

/// QoS for a 3.1.1 client from a validated 0..=2 value.
pub fn v3_qos(qos: u8) -> Option<V3QoS> {
    match qos {
        0 => Some(V3QoS::AtMostOnce),
        1 => Some(V3QoS::AtLeastOnce),
        2 => Some(V3QoS::ExactlyOnce),
        _ => None,
    }
}

pub fn v5_qos_to_u8(qos: V5QoS) -> u8 {
    match qos {
        V5QoS::AtMostOnce => 0,
        V5QoS::AtLeastOnce => 1,
        V5QoS::ExactlyOnce => 2,
    }
}

pub fn v3_qos_to_u8(qos: V3QoS) -> u8 {
    match qos {
        V3QoS::AtMostOnce => 0,
        V3QoS::AtLeastOnce => 1,
        V3QoS::ExactlyOnce => 2,
    }
}

/// v5 CONNACK reason code to its wire value.
pub fn connect_code_v5(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::UnspecifiedError => 128,
        ConnectReturnCode::MalformedPacket => 129,
        ConnectReturnCode::ProtocolError => 130,
        ConnectReturnCode::ImplementationSpecificError => 131,
        ConnectReturnCode::UnsupportedProtocolVersion => 132,
        ConnectReturnCode::ClientIdentifierNotValid => 133,
        ConnectReturnCode::BadUserNamePassword => 134,
        ConnectReturnCode::NotAuthorized => 135,
        ConnectReturnCode::ServerUnavailable => 136,
        ConnectReturnCode::ServerBusy => 137,
        ConnectReturnCode::Banned => 138,
        ConnectReturnCode::BadAuthenticationMethod => 140,
        ConnectReturnCode::TopicNameInvalid => 144,
        ConnectReturnCode::PacketTooLarge => 149,
        ConnectReturnCode::QuotaExceeded => 151,
        ConnectReturnCode::PayloadFormatInvalid => 153,
        ConnectReturnCode::RetainNotSupported => 154,
        ConnectReturnCode::QoSNotSupported => 155,
        ConnectReturnCode::UseAnotherServer => 156,
        ConnectReturnCode::ServerMoved => 157,
        ConnectReturnCode::ConnectionRateExceeded => 159,
    }
}

/// 3.1.1 CONNACK return code to its wire value.
pub fn connect_code_v311(code: v4::ConnectReturnCode) -> u8 {
    match code {
        v4::ConnectReturnCode::Success => 0,
        v4::ConnectReturnCode::RefusedProtocolVersion => 1,
        v4::ConnectReturnCode::BadClientId => 2,
        v4::ConnectReturnCode::ServiceUnavailable => 3,
        v4::ConnectReturnCode::BadUserNamePassword => 4,
        v4::ConnectReturnCode::NotAuthorized => 5,
    }
}

/// v5 SUBACK reason code to its wire value; 0..=2 is the granted QoS.
pub fn suback_code_v5(code: SubscribeReasonCode) -> u8 {
    match code {
        SubscribeReasonCode::QoS0 => 0,
        SubscribeReasonCode::QoS1 => 1,
        SubscribeReasonCode::QoS2 => 2,
        SubscribeReasonCode::Unspecified => 128,
        SubscribeReasonCode::ImplementationSpecific => 131,
        SubscribeReasonCode::NotAuthorized => 135,
        SubscribeReasonCode::TopicFilterInvalid => 143,
        SubscribeReasonCode::PkidInUse => 145,
        SubscribeReasonCode::QuotaExceeded => 151,
        SubscribeReasonCode::SharedSubscriptionsNotSupported => 158,
        SubscribeReasonCode::SubscriptionIdNotSupported => 161,
        SubscribeReasonCode::WildcardSubscriptionsNotSupported => 162,
    }
}

/// 3.1.1 SUBACK return code: granted QoS or the failure marker.
pub fn suback_code_v311(code: v4::SubscribeReasonCode) -> u8 {
    match code {
        v4::SubscribeReasonCode::Success(qos) => v3_qos_to_u8(qos),
        v4::SubscribeReasonCode::Failure => 128,
    }
}

/// PUBACK reason code to its wire value.
pub fn puback_code(reason: PubAckReason) -> u8 {
    match reason {
        PubAckReason::Success => 0,
        PubAckReason::NoMatchingSubscribers => 16,
        PubAckReason::UnspecifiedError => 128,
        PubAckReason::ImplementationSpecificError => 131,
        PubAckReason::NotAuthorized => 135,
        PubAckReason::TopicNameInvalid => 144,
        PubAckReason::PacketIdentifierInUse => 145,
        PubAckReason::QuotaExceeded => 151,
        PubAckReason::PayloadFormatInvalid => 153,
    }
}

/// PUBCOMP reason code to its wire value (QoS 2 completion).
pub fn pubcomp_code(reason: PubCompReason) -> u8 {
    match reason {
        PubCompReason::Success => 0,
        PubCompReason::PacketIdentifierNotFound => 146,
    }
}

/// DISCONNECT reason code to its wire value.
pub fn disconnect_code(reason: DisconnectReasonCode) -> u8 {
    match reason {
        DisconnectReasonCode::NormalDisconnection => 0,
        DisconnectReasonCode::DisconnectWithWillMessage => 4,
        DisconnectReasonCode::UnspecifiedError => 128,
        DisconnectReasonCode::MalformedPacket => 129,
        DisconnectReasonCode::ProtocolError => 130,
        DisconnectReasonCode::ImplementationSpecificError => 131,
        DisconnectReasonCode::NotAuthorized => 135,
        DisconnectReasonCode::ServerBusy => 137,
        DisconnectReasonCode::ServerShuttingDown => 139,
        DisconnectReasonCode::KeepAliveTimeout => 141,
        DisconnectReasonCode::SessionTakenOver => 142,
        DisconnectReasonCode::TopicFilterInvalid => 143,
        DisconnectReasonCode::TopicNameInvalid => 144,
        DisconnectReasonCode::ReceiveMaximumExceeded => 147,
        DisconnectReasonCode::TopicAliasInvalid => 148,
        DisconnectReasonCode::PacketTooLarge => 149,
        DisconnectReasonCode::MessageRateTooHigh => 150,
        DisconnectReasonCode::QuotaExceeded => 151,
        DisconnectReasonCode::AdministrativeAction => 152,
        DisconnectReasonCode::PayloadFormatInvalid => 153,
        DisconnectReasonCode::RetainNotSupported => 154,
        DisconnectReasonCode::QoSNotSupported => 155,
        DisconnectReasonCode::UseAnotherServer => 156,
        DisconnectReasonCode::ServerMoved => 157,
        DisconnectReasonCode::SharedSubscriptionNotSupported => 158,
        DisconnectReasonCode::ConnectionRateExceeded => 159,
        DisconnectReasonCode::MaximumConnectTime => 160,
        DisconnectReasonCode::SubscriptionIdentifiersNotSupported => 161,
        DisconnectReasonCode::WildcardSubscriptionsNotSupported => 162,
    }
}
