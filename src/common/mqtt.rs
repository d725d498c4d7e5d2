//! MQTT connectivity module on top of paho-mqtt

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use paho_mqtt;

use super::error::{DeviceClientError, ErrorCode};
use super::setting::Settings;
use super::transport::{ConnectOptions, InboundMessage, ModuleInfo, QoS, TlsMethod, Transport};
use crate::entity::bo::device_config_bo::NetworkSettings;
use crate::{debug, error, info, warn};

const LOG_TAG : &str = "mqtt";

pub struct PahoTransport {
    /// storage root the credential file paths are relative to
    storage_root: PathBuf,

    keep_alive: Duration,

    receive_timeout: Duration,

    module: ModuleInfo,

    /// connection client object
    client: Option<paho_mqtt::AsyncClient>,

    /// inbound messages forwarded by the paho callback
    inbound_rx: Option<mpsc::Receiver<InboundMessage>>,
}

impl PahoTransport {
    pub fn new(storage_root: impl Into<PathBuf>, settings: &Settings) -> Self {
        PahoTransport {
            storage_root: storage_root.into(),
            keep_alive: Duration::from_secs(settings.mqtt.keep_alive_secs),
            receive_timeout: Duration::from_millis(settings.mqtt.receive_timeout_millis),
            module: ModuleInfo {
                firmware_version: settings.board.firmware_version.clone(),
                mac_address: settings.board.mac_address.clone(),
                udid: settings.board.udid.clone(),
            },
            client: None,
            inbound_rx: None,
        }
    }

    fn ssl_options(&self, options: &ConnectOptions) -> Result<paho_mqtt::SslOptions, paho_mqtt::Error> {
        let security = &options.security;
        let mut builder = paho_mqtt::SslOptionsBuilder::new();
        builder
            .trust_store(self.storage_root.join(&security.ca_file))?
            .key_store(self.storage_root.join(&security.certificate_file))?
            .private_key(self.storage_root.join(&security.private_key_file))?;
        builder
            .ssl_version(match security.method {
                TlsMethod::Tlsv1_2 => paho_mqtt::SslVersion::Tls_1_2,
            })
            .enabled_cipher_suites(openssl_cipher_name(&security.cipher));
        Ok(builder.finalize())
    }

    fn open(&mut self, options: &ConnectOptions) -> Result<(), paho_mqtt::Error> {
        let create_opts = paho_mqtt::CreateOptionsBuilder::new()
            .server_uri(format!("ssl://{}:{}", options.address, options.port))
            .client_id(options.client_id.as_str())
            .finalize();

        let client = paho_mqtt::AsyncClient::new(create_opts)?;

        let mut conn_builder = paho_mqtt::ConnectOptionsBuilder::new();
        conn_builder
            .keep_alive_interval(self.keep_alive)
            .clean_session(true)
            .ssl_options(self.ssl_options(options)?);
        if let Some(username) = &options.username {
            conn_builder.user_name(username.as_str());
        }
        let conn_opts = conn_builder.finalize();

        client.set_connection_lost_callback(|_cli| {
            error!(LOG_TAG, "*** mqtt Connection lost ***");
        });

        let (tx, rx) = mpsc::channel();
        client.set_message_callback(move |_cli, msg| {
            if let Some(msg) = msg {
                debug!(LOG_TAG, "received message on topic {}", msg.topic());
                let _ = tx.send(InboundMessage {
                    topic: msg.topic().to_string(),
                    payload: msg.payload().to_vec(),
                });
            }
        });

        client.connect(conn_opts).wait()?;

        self.client = Some(client);
        self.inbound_rx = Some(rx);
        Ok(())
    }

    fn client(&self) -> Result<&paho_mqtt::AsyncClient, DeviceClientError> {
        self.client
            .as_ref()
            .ok_or_else(|| DeviceClientError::new(ErrorCode::NotConnected, "no broker connection"))
    }
}

impl Transport for PahoTransport {
    fn join_network(&mut self, network: &NetworkSettings) -> Result<(), DeviceClientError> {
        // the host network stack is already associated, only record what the module would use
        info!(
            LOG_TAG,
            "network ready, ssid: {}, sntp server: {}, timezone: {}",
            network.wifi_ssid, network.ntp_server, network.timezone
        );
        Ok(())
    }

    fn leave_network(&mut self) -> Result<(), DeviceClientError> {
        self.disconnect();
        Ok(())
    }

    fn connect(&mut self, options: &ConnectOptions) -> Result<(), DeviceClientError> {
        self.disconnect();
        let ca_path = self.storage_root.join(&options.security.ca_file);
        if !ca_path.is_file() {
            error!(LOG_TAG, "root CA {} not found", ca_path.display());
            return Err(DeviceClientError::new(
                ErrorCode::WrongRootCa,
                format!("root CA {} not found", options.security.ca_file),
            ));
        }
        self.open(options).map_err(|e| {
            error!(LOG_TAG, "cannot connect to mqtt server {}: {:?}", options.address, e);
            DeviceClientError::new(connect_error_code(&e), format!("mqtt connect error: {e}"))
        })
    }

    fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect(None::<paho_mqtt::DisconnectOptions>).wait() {
                warn!(LOG_TAG, "mqtt disconnect error: {e}");
            }
        }
        self.inbound_rx = None;
    }

    fn publish(&mut self, topic: &str, qos: QoS, payload: &[u8]) -> Result<(), DeviceClientError> {
        let msg = paho_mqtt::Message::new(topic, payload.to_vec(), qos as i32);
        self.client()?.publish(msg).wait().map_err(|e| {
            DeviceClientError::new(ErrorCode::PublishFailure, format!("mqtt publish error: {e}"))
        })
    }

    fn subscribe(&mut self, topics: &[(&str, QoS)]) -> Result<(), DeviceClientError> {
        let names: Vec<&str> = topics.iter().map(|(topic, _)| *topic).collect();
        let qos: Vec<i32> = topics.iter().map(|(_, qos)| *qos as i32).collect();
        for name in &names {
            info!(LOG_TAG, "mqtt subscribe topic: {}", name);
        }
        self.client()?.subscribe_many(&names, &qos).wait().map(|_| ()).map_err(|e| {
            DeviceClientError::new(ErrorCode::SubscribeFailure, format!("mqtt subscribe error: {e}"))
        })
    }

    fn receive(&mut self) -> Option<InboundMessage> {
        let rx = self.inbound_rx.as_ref()?;
        rx.recv_timeout(self.receive_timeout).ok()
    }

    fn module_info(&self) -> ModuleInfo {
        self.module.clone()
    }
}

/// paho C library return code for a general failure
const PAHO_FAILURE: i32 = -1;

/// a failed TLS handshake surfaces as `[-1] TCP/TLS connect failure`, which is treated as a refused root CA
fn connect_error_code(e: &paho_mqtt::Error) -> ErrorCode {
    match e {
        paho_mqtt::Error::PahoDescr(PAHO_FAILURE, _) => ErrorCode::WrongRootCa,
        other => {
            let description = other.to_string().to_lowercase();
            if ["tls", "ssl", "certificate"].iter().any(|word| description.contains(word)) {
                ErrorCode::WrongRootCa
            } else {
                ErrorCode::ConnectFailure
            }
        }
    }
}

/// map the IANA suite name used by the device record to the OpenSSL name
fn openssl_cipher_name(cipher: &str) -> &str {
    match cipher {
        "TLS_RSA_WITH_AES_128_CBC_SHA256" => "AES128-SHA256",
        "TLS_RSA_WITH_AES_256_CBC_SHA256" => "AES256-SHA256",
        "TLS_RSA_WITH_AES_128_CBC_SHA" => "AES128-SHA",
        "TLS_RSA_WITH_AES_256_CBC_SHA" => "AES256-SHA",
        other => other,
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::device_config::config_store::device_security;

    #[test]
    fn test_cipher_names() {
        assert_eq!(openssl_cipher_name("TLS_RSA_WITH_AES_128_CBC_SHA256"), "AES128-SHA256");
        assert_eq!(openssl_cipher_name("ECDHE-RSA-AES128-GCM-SHA256"), "ECDHE-RSA-AES128-GCM-SHA256");
    }

    #[test]
    fn test_tls_handshake_failure_is_a_wrong_root_ca() {
        let handshake = paho_mqtt::Error::PahoDescr(-1, "TCP/TLS connect failure".to_string());
        assert_eq!(connect_error_code(&handshake), ErrorCode::WrongRootCa);
        let ssl = paho_mqtt::Error::GeneralString("SSL routines: certificate verify failed".to_string());
        assert_eq!(connect_error_code(&ssl), ErrorCode::WrongRootCa);

        assert_eq!(connect_error_code(&paho_mqtt::Error::Timeout), ErrorCode::ConnectFailure);
        assert_eq!(connect_error_code(&paho_mqtt::Error::Paho(-8)), ErrorCode::ConnectFailure);
    }

    #[test]
    fn test_missing_root_ca_is_reported_before_connecting() {
        let mut transport = PahoTransport::new("no-such-storage-root", Settings::get());
        let options = ConnectOptions {
            address: "myhub.example.net".to_string(),
            port: 8883,
            client_id: "dev-1".to_string(),
            username: None,
            security: device_security(),
        };
        let err = transport.connect(&options).unwrap_err();
        assert_eq!(err.code, ErrorCode::WrongRootCa);
        assert!(transport.client.is_none());
    }

    #[test]
    fn test_operations_without_connection() {
        let mut transport = PahoTransport::new("storage", Settings::get());
        assert!(transport.receive().is_none());
        let err = transport.publish("devices/x/messages/events/", QoS::AtLeastOnce, b"{}").unwrap_err();
        assert_eq!(err.code, ErrorCode::NotConnected);
        let err = transport.subscribe(&[("$iothub/twin/res/#", QoS::AtLeastOnce)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotConnected);
    }
}
