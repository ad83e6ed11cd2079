//! Pure routing of rumqttc events into transport notifications
//!
//! This module contains pure functions for classifying MQTT events and
//! decoding payloads.

use crate::transport::TransportEvent;
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Reason code used for subscriptions the broker rejected
const SUBSCRIBE_FAILURE: u8 = 0x80;

/// Pure routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to the notification it represents (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::Notify(TransportEvent::Connected {
                    code: connack.code as u8,
                }),
                Packet::Publish(publish) => EventRoute::Notify(TransportEvent::Message {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                }),
                Packet::PubAck(puback) => EventRoute::Notify(TransportEvent::Published {
                    packet_id: puback.pkid,
                }),
                Packet::SubAck(suback) => EventRoute::Notify(TransportEvent::Subscribed {
                    packet_id: suback.pkid,
                    reason_codes: suback
                        .return_codes
                        .iter()
                        .map(Self::subscribe_reason_code)
                        .collect(),
                }),
                Packet::Disconnect(disconnect) => {
                    EventRoute::Notify(TransportEvent::Disconnected {
                        code: disconnect.reason_code as u8,
                    })
                }
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::LocalDisconnect,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Granted QoS on success, 0x80 for any refusal
    fn subscribe_reason_code(code: &SubscribeReasonCode) -> u8 {
        match code {
            SubscribeReasonCode::Success(qos) => *qos as u8,
            _ => SUBSCRIBE_FAILURE,
        }
    }

    /// Decode an incoming payload as text (pure function)
    pub fn decode_payload(payload: &[u8]) -> String {
        String::from_utf8_lossy(payload).into_owned()
    }

    /// Validate subscription success from SubAck reason codes (pure function)
    pub fn validate_subscription_success(reason_codes: &[u8]) -> Result<(), String> {
        if reason_codes.iter().any(|&code| code >= SUBSCRIBE_FAILURE) {
            Err(format!(
                "Subscription failed with reason codes: {reason_codes:?}"
            ))
        } else {
            Ok(())
        }
    }

    /// Whether this notification ends the session's delivery loop (pure function)
    pub fn ends_session(event: &TransportEvent) -> bool {
        matches!(event, TransportEvent::Disconnected { .. })
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Forward to the session's event sink
    Notify(TransportEvent),
    /// Our own DISCONNECT went out; the session is over
    LocalDisconnect,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish,
    };
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::Notify(TransportEvent::Connected { code: 0 })
        );
    }

    #[test]
    fn test_route_broker_disconnect() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::ServerShuttingDown,
            properties: None,
        }));

        match MessageHandler::route_mqtt_event(&disconnect) {
            EventRoute::Notify(TransportEvent::Disconnected { code }) => assert_ne!(code, 0),
            other => panic!("Expected Disconnected route, got {other:?}"),
        }
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: "fleet/d1/in".into(),
            pkid: 1,
            payload: "hello".into(),
            properties: None,
        }));

        assert_eq!(
            MessageHandler::route_mqtt_event(&publish),
            EventRoute::Notify(TransportEvent::Message {
                topic: "fleet/d1/in".to_string(),
                payload: b"hello".to_vec(),
            })
        );
    }

    #[test]
    fn test_route_outgoing() {
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::LocalDisconnect
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        );
    }

    #[test]
    fn test_decode_payload() {
        assert_eq!(MessageHandler::decode_payload(b"{\"t\": 21.5}"), "{\"t\": 21.5}");
        // Invalid UTF-8 is replaced rather than rejected
        assert_eq!(MessageHandler::decode_payload(&[0x68, 0xff]), "h\u{fffd}");
    }

    #[test]
    fn test_validate_subscription_success() {
        assert!(MessageHandler::validate_subscription_success(&[0x00, 0x01, 0x02]).is_ok());
        assert!(MessageHandler::validate_subscription_success(&[0x80, 0x87]).is_err());
        assert!(MessageHandler::validate_subscription_success(&[0x01, 0x80]).is_err());
    }

    #[test]
    fn test_ends_session() {
        assert!(MessageHandler::ends_session(&TransportEvent::Disconnected { code: 0 }));
        assert!(!MessageHandler::ends_session(&TransportEvent::Published { packet_id: 3 }));
    }
}
