//! Pure option building for rumqttc sessions
//!
//! Translates transport-neutral [`SessionOptions`] into rumqttc's MQTT v5
//! options. Nothing here touches the network.

use crate::transport::{SessionOptions, TlsMaterial};
use rumqttc::v5::MqttOptions;
use rumqttc::{TlsConfiguration, Transport as RumqttcTransport};

/// Request channel capacity between `AsyncClient` and its event loop
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Maximum incoming packet size; device payloads are small JSON documents
const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Pure function to configure MQTT options from resolved session options
pub fn configure_mqtt_options(options: &SessionOptions) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(&options.client_id, &options.host, options.port);
    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    if let Some(credentials) = &options.credentials {
        mqtt_options.set_credentials(&credentials.username, &credentials.password);
    }

    if let Some(tls) = &options.tls {
        mqtt_options.set_transport(tls_transport(tls));
    }

    mqtt_options
}

/// rustls-backed transport; rustls never negotiates below TLS 1.2
fn tls_transport(tls: &TlsMaterial) -> RumqttcTransport {
    RumqttcTransport::tls_with_config(TlsConfiguration::Simple {
        ca: tls.ca.clone(),
        alpn: None,
        client_auth: tls.client_auth.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Credentials;
    use std::time::Duration;

    fn test_session_options() -> SessionOptions {
        let mut options = SessionOptions::new("device-1", "broker.local", 1883);
        options.keep_alive = Duration::from_secs(30);
        options
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&test_session_options());
        assert_eq!(options.client_id(), "device-1");
        assert_eq!(
            options.broker_address(),
            ("broker.local".to_string(), 1883)
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(matches!(options.transport(), RumqttcTransport::Tcp));
    }

    #[test]
    fn test_credentials_applied() {
        let mut session = test_session_options();
        session.credentials = Some(Credentials {
            username: "token-abc".to_string(),
            password: String::new(),
        });

        let options = configure_mqtt_options(&session);
        assert_eq!(options.client_id(), "device-1");
        assert!(matches!(options.transport(), RumqttcTransport::Tcp));
    }

    #[test]
    fn test_tls_transport_selected() {
        let mut session = test_session_options();
        session.tls = Some(TlsMaterial {
            ca: b"-----BEGIN CERTIFICATE-----".to_vec(),
            client_auth: None,
        });

        let options = configure_mqtt_options(&session);
        assert!(matches!(options.transport(), RumqttcTransport::Tls(_)));
    }
}
