//! Pure routing of rumqttc events
//!
//! The driver task turns every polled [`Event`] into an [`EventRoute`] and
//! acts on the route; delivery progress is forwarded to the publisher as
//! [`DeliveryEvent`]s.

use super::connection::connack_code;
use crate::protocol::QosLevel;
use rumqttc::{Event, Outgoing, Packet};

/// Progress of an outgoing publish, keyed by packet id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// PUBLISH written to the socket (packet id 0 for QoS 0)
    Sent(u16),
    /// QoS 1 acknowledgement
    PubAck(u16),
    /// First half of the QoS 2 handshake
    PubRec(u16),
    /// QoS 2 handshake complete
    PubComp(u16),
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK received with the given return code
    ConnectionAcknowledged { code: u8 },
    /// Progress of one of our publishes
    Delivery(DeliveryEvent),
    /// Broker sent DISCONNECT
    Disconnected,
    /// Our own DISCONNECT went out; the session is closing
    ClientDisconnected,
    /// Anything else from the broker (PINGRESP, ...)
    InfrastructureEvent(String),
    /// Outgoing packet with no delivery meaning (PINGREQ, PUBREL, ...)
    OutgoingEvent,
}

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    code: connack_code(connack.code),
                },
                Packet::PubAck(puback) => EventRoute::Delivery(DeliveryEvent::PubAck(puback.pkid)),
                Packet::PubRec(pubrec) => EventRoute::Delivery(DeliveryEvent::PubRec(pubrec.pkid)),
                Packet::PubComp(pubcomp) => {
                    EventRoute::Delivery(DeliveryEvent::PubComp(pubcomp.pkid))
                }
                Packet::Disconnect => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                EventRoute::Delivery(DeliveryEvent::Sent(*pkid))
            }
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::ClientDisconnected,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Whether `event` completes delivery of packet `pkid` at `qos` (pure function)
    ///
    /// QoS 0 has no broker acknowledgement; its success is decided when the
    /// local queue accepts the message, so nothing completes it here.
    pub fn completes_delivery(qos: QosLevel, pkid: u16, event: &DeliveryEvent) -> bool {
        match (qos, event) {
            (QosLevel::AtLeastOnce, DeliveryEvent::PubAck(acked)) => *acked == pkid,
            (QosLevel::ExactlyOnce, DeliveryEvent::PubComp(completed)) => *completed == pkid,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, PubAck, PubComp, PubRec};

    #[test]
    fn test_route_connack() {
        let success = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        )));
        assert_eq!(
            MessageHandler::route_mqtt_event(&success),
            EventRoute::ConnectionAcknowledged { code: 0 }
        );

        let refused = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::NotAuthorized,
            false,
        )));
        assert_eq!(
            MessageHandler::route_mqtt_event(&refused),
            EventRoute::ConnectionAcknowledged { code: 5 }
        );
    }

    #[test]
    fn test_route_delivery_events() {
        let sent = Event::Outgoing(Outgoing::Publish(7));
        assert_eq!(
            MessageHandler::route_mqtt_event(&sent),
            EventRoute::Delivery(DeliveryEvent::Sent(7))
        );

        let puback = Event::Incoming(Packet::PubAck(PubAck::new(7)));
        assert_eq!(
            MessageHandler::route_mqtt_event(&puback),
            EventRoute::Delivery(DeliveryEvent::PubAck(7))
        );

        let pubrec = Event::Incoming(Packet::PubRec(PubRec::new(8)));
        assert_eq!(
            MessageHandler::route_mqtt_event(&pubrec),
            EventRoute::Delivery(DeliveryEvent::PubRec(8))
        );

        let pubcomp = Event::Incoming(Packet::PubComp(PubComp::new(8)));
        assert_eq!(
            MessageHandler::route_mqtt_event(&pubcomp),
            EventRoute::Delivery(DeliveryEvent::PubComp(8))
        );
    }

    #[test]
    fn test_route_disconnect_and_infrastructure() {
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::Disconnect)),
            EventRoute::Disconnected
        );

        let ping = Event::Incoming(Packet::PingResp);
        assert!(matches!(
            MessageHandler::route_mqtt_event(&ping),
            EventRoute::InfrastructureEvent(_)
        ));

        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::ClientDisconnected
        );

        let pingreq = Event::Outgoing(Outgoing::PingReq);
        assert_eq!(
            MessageHandler::route_mqtt_event(&pingreq),
            EventRoute::OutgoingEvent
        );
    }

    #[test]
    fn test_completes_delivery() {
        use DeliveryEvent::*;

        // QoS 1 completes on the matching PUBACK only
        assert!(MessageHandler::completes_delivery(
            QosLevel::AtLeastOnce,
            3,
            &PubAck(3)
        ));
        assert!(!MessageHandler::completes_delivery(
            QosLevel::AtLeastOnce,
            3,
            &PubAck(4)
        ));

        // QoS 2 needs PUBCOMP; PUBREC is only half way
        assert!(!MessageHandler::completes_delivery(
            QosLevel::ExactlyOnce,
            3,
            &PubRec(3)
        ));
        assert!(MessageHandler::completes_delivery(
            QosLevel::ExactlyOnce,
            3,
            &PubComp(3)
        ));

        // QoS 0 is never completed by a broker packet
        assert!(!MessageHandler::completes_delivery(
            QosLevel::AtMostOnce,
            0,
            &Sent(0)
        ));
    }
}
