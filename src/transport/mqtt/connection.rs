//! Pure translation of connect parameters into rumqttc options

use crate::session::model::QoS;
use crate::transport::{ConnectParams, DisconnectReason};
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, LastWill};
use rumqttc::v5::mqttbytes::QoS as WireQoS;
use rumqttc::v5::{ConnectionError, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;

/// Map our QoS onto the wire enum (pure function)
pub fn wire_qos(qos: QoS) -> WireQoS {
    match qos {
        QoS::AtMostOnce => WireQoS::AtMostOnce,
        QoS::AtLeastOnce => WireQoS::AtLeastOnce,
        QoS::ExactlyOnce => WireQoS::ExactlyOnce,
    }
}

/// Host to dial: the resolved IP for plain TCP, the configured name for TLS
/// so certificate name checks still see the broker's host name
pub fn dial_host(params: &ConnectParams) -> String {
    if params.requires_tls() {
        params.credentials.address.clone()
    } else {
        params.ip.to_string()
    }
}

/// Build rumqttc options for one connection attempt (pure function)
pub fn configure_mqtt_options(params: &ConnectParams) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(
        params.credentials.client_id(),
        dial_host(params),
        params.credentials.port,
    );

    if params.requires_tls() {
        // Fingerprint pinning is not available through rumqttc; the system
        // trust store is used instead.
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &params.credentials.username {
        let password = params.credentials.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(u64::from(params.keep_alive_secs)));
    mqtt_options.set_clean_start(params.clean_session);

    if let Some(will) = &params.last_will {
        let lwt = LastWill::new(
            &will.topic,
            will.payload.clone(),
            wire_qos(will.qos),
            will.retain,
            None,
        );
        mqtt_options.set_last_will(lwt);
    }

    mqtt_options
}

/// Why a refused CONNECT ended the attempt (pure function)
pub fn refused_reason(code: &ConnectReturnCode) -> DisconnectReason {
    match code {
        ConnectReturnCode::UnsupportedProtocolVersion => DisconnectReason::UnacceptableProtocolVersion,
        ConnectReturnCode::ClientIdentifierNotValid => DisconnectReason::IdentifierRejected,
        ConnectReturnCode::ServerUnavailable | ConnectReturnCode::ServerBusy => {
            DisconnectReason::ServerUnavailable
        }
        ConnectReturnCode::BadUserNamePassword => DisconnectReason::MalformedCredentials,
        ConnectReturnCode::NotAuthorized => DisconnectReason::NotAuthorized,
        other => DisconnectReason::Other(format!("connection refused: {other:?}")),
    }
}

/// Classify an event loop failure (pure function)
pub fn disconnect_reason_for(error: &ConnectionError) -> DisconnectReason {
    match error {
        ConnectionError::ConnectionRefused(code) => refused_reason(code),
        ConnectionError::Io(_) => DisconnectReason::TcpDisconnected,
        other => DisconnectReason::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::{Credentials, Message};

    fn params(address: &str, ip: &str) -> ConnectParams {
        ConnectParams {
            ip: ip.parse().unwrap(),
            credentials: Credentials::new(address, 1883, "kitchen").with_login("user", "secret"),
            keep_alive_secs: 15,
            last_will: Some(Message::new("kitchen/status", "offline").retained(true)),
            tls: false,
            ssl_fingerprints: Vec::new(),
            clean_session: true,
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&params("broker.local", "10.0.0.3"));
        assert_eq!(options.client_id(), "kitchen");
        assert_eq!(options.broker_address(), ("10.0.0.3".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
    }

    #[test]
    fn test_tls_dials_host_name() {
        let mut p = params("broker.example.com", "10.0.0.3");
        assert_eq!(dial_host(&p), "10.0.0.3");

        p.ssl_fingerprints.push([0u8; 20]);
        assert_eq!(dial_host(&p), "broker.example.com");
    }

    #[test]
    fn test_secure_scheme_dials_host_name() {
        let mut p = params("broker.example.com", "10.0.0.3");
        p.tls = true;
        assert!(p.requires_tls());
        assert_eq!(dial_host(&p), "broker.example.com");
    }

    #[test]
    fn test_wire_qos() {
        assert_eq!(wire_qos(QoS::AtMostOnce), WireQoS::AtMostOnce);
        assert_eq!(wire_qos(QoS::ExactlyOnce), WireQoS::ExactlyOnce);
    }

    #[test]
    fn test_refused_reason() {
        assert_eq!(
            refused_reason(&ConnectReturnCode::NotAuthorized),
            DisconnectReason::NotAuthorized
        );
        assert_eq!(
            refused_reason(&ConnectReturnCode::BadUserNamePassword),
            DisconnectReason::MalformedCredentials
        );
        assert_eq!(
            refused_reason(&ConnectReturnCode::ServerBusy),
            DisconnectReason::ServerUnavailable
        );
        assert!(matches!(
            refused_reason(&ConnectReturnCode::Banned),
            DisconnectReason::Other(_)
        ));
    }

    #[test]
    fn test_io_error_is_tcp_disconnect() {
        let error = ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert_eq!(disconnect_reason_for(&error), DisconnectReason::TcpDisconnected);
    }
}
