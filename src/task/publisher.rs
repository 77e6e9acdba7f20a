//! Telemetry Publisher
//!
//! Owns the broker session and turns [`TelemetryRecord`]s into line messages
//! on the configured topic. There is no queue and no retry: a failed connect
//! or publish is returned to the supervisor, which resets the node.

use crate::system::config::Verbosity;
use crate::system::error::{ConnectionError, PublishError, SessionError};
use crate::task::message::{format_message, DeviceIdentity, TelemetryRecord};

/// Broker transport
#[allow(async_fn_in_trait)]
pub trait BrokerSession {
    /// Establishes the transport and completes the broker handshake
    async fn open(&mut self) -> Result<(), SessionError>;

    /// Sends `payload` on `topic`, at most once
    async fn send(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError>;

    /// Tears the session down, ignoring errors
    async fn close(&mut self);
}

/// Publisher view of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

pub struct TelemetryPublisher<'a, S> {
    session: S,
    topic: &'a str,
    identity: DeviceIdentity<'a>,
    state: ConnectionState,
    verbosity: Verbosity,
}

impl<'a, S: BrokerSession> TelemetryPublisher<'a, S> {
    pub fn new(
        session: S,
        topic: &'a str,
        identity: DeviceIdentity<'a>,
        verbosity: Verbosity,
    ) -> Self {
        Self {
            session,
            topic,
            identity,
            state: ConnectionState::Disconnected,
            verbosity,
        }
    }

    /// Opens the broker session
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        match self.session.open().await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                info!("connected to broker as {}", self.identity.client_id);
                Ok(())
            }
            Err(cause) => {
                self.state = ConnectionState::Disconnected;
                error!("broker connection failed: {}", cause);
                Err(ConnectionError { cause })
            }
        }
    }

    /// Formats `record` and sends it on the topic
    ///
    /// A transport failure leaves the publisher disconnected.
    pub async fn publish(&mut self, record: &TelemetryRecord) -> Result<(), PublishError> {
        let category = record.category();
        if self.state != ConnectionState::Connected {
            return Err(PublishError::Transport {
                category,
                cause: SessionError::NotConnected,
            });
        }

        let message = format_message(&self.identity, record)
            .map_err(|cause| PublishError::Format { category, cause })?;
        if self.verbosity.allows(Verbosity::TRACE) {
            debug!("{} <- {}", self.topic, message.as_str());
        }

        if let Err(cause) = self.session.send(self.topic, message.as_bytes()).await {
            self.state = ConnectionState::Disconnected;
            return Err(PublishError::Transport { category, cause });
        }
        if self.verbosity.allows(Verbosity::DETAIL) {
            debug!("{} message sent", category.as_str());
        }
        Ok(())
    }

    /// Best-effort teardown before a reset
    pub async fn disconnect(&mut self) {
        self.session.close().await;
        self.state = ConnectionState::Disconnected;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session(&self) -> &S {
        &self.session
    }
}

#[cfg(feature = "firmware")]
pub use mqtt::{MqttSession, SessionBuffers};

#[cfg(feature = "firmware")]
mod mqtt {
    use embassy_net::dns::DnsQueryType;
    use embassy_net::tcp::TcpSocket;
    use embassy_net::Stack;
    use embassy_time::Duration;
    use rust_mqtt::client::client::MqttClient;
    use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
    use rust_mqtt::packet::v5::publish_packet::QualityOfService;
    use rust_mqtt::packet::v5::reason_codes::ReasonCode;
    use rust_mqtt::utils::rng_generator::CountingRng;

    use super::BrokerSession;
    use crate::system::config::BrokerConfig;
    use crate::system::error::SessionError;

    /// Property slots for the MQTT v5 client
    const MAX_PROPERTIES: usize = 5;

    /// Socket timeout for the broker connection
    const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

    /// Memory for one broker connection
    ///
    /// A session is opened at most once per boot, so the buffers are handed
    /// over on the first [`BrokerSession::open`] and never returned.
    pub struct SessionBuffers<'a> {
        pub tcp_rx: &'a mut [u8],
        pub tcp_tx: &'a mut [u8],
        pub mqtt_rx: &'a mut [u8],
        pub mqtt_tx: &'a mut [u8],
    }

    type Client<'a> = MqttClient<'a, TcpSocket<'a>, MAX_PROPERTIES, CountingRng>;

    /// MQTT v5 session over an embassy-net TCP socket
    pub struct MqttSession<'a> {
        stack: Stack<'static>,
        broker: &'a BrokerConfig,
        buffers: Option<SessionBuffers<'a>>,
        client: Option<Client<'a>>,
    }

    impl<'a> MqttSession<'a> {
        pub fn new(stack: Stack<'static>, broker: &'a BrokerConfig, buffers: SessionBuffers<'a>) -> Self {
            Self {
                stack,
                broker,
                buffers: Some(buffers),
                client: None,
            }
        }

        async fn socket(
            &self,
            rx: &'a mut [u8],
            tx: &'a mut [u8],
        ) -> Result<TcpSocket<'a>, SessionError> {
            let addrs = self
                .stack
                .dns_query(self.broker.host, DnsQueryType::A)
                .await
                .map_err(|_| SessionError::Resolve)?;
            let addr = *addrs.first().ok_or(SessionError::Resolve)?;
            info!("broker {} resolved to {}", self.broker.host, defmt::Display2Format(&addr));

            let mut socket = TcpSocket::new(self.stack, rx, tx);
            socket.set_timeout(Some(SOCKET_TIMEOUT));
            socket
                .connect((addr, self.broker.port))
                .await
                .map_err(|e| {
                    error!(
                        "tcp connect to {}:{} failed: {:?}",
                        defmt::Display2Format(&addr),
                        self.broker.port,
                        e
                    );
                    SessionError::Tcp
                })?;
            Ok(socket)
        }

        fn client_config(&self) -> ClientConfig<'a, MAX_PROPERTIES, CountingRng> {
            let mut config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(0));
            config.add_client_id(self.broker.client_id);
            // no pings are sent between publishes
            config.keep_alive = 0;
            if !self.broker.username.is_empty() {
                config.add_username(self.broker.username);
                if !self.broker.password.is_empty() {
                    config.add_password(self.broker.password);
                }
            }
            config
        }
    }

    impl BrokerSession for MqttSession<'_> {
        async fn open(&mut self) -> Result<(), SessionError> {
            let buffers = self.buffers.take().ok_or(SessionError::Exhausted)?;
            let socket = self.socket(buffers.tcp_rx, buffers.tcp_tx).await?;

            let tx_len = buffers.mqtt_tx.len();
            let rx_len = buffers.mqtt_rx.len();
            let config = self.client_config();
            let mut client = MqttClient::new(
                socket,
                buffers.mqtt_tx,
                tx_len,
                buffers.mqtt_rx,
                rx_len,
                config,
            );
            client.connect_to_broker().await.map_err(|e| {
                error!("mqtt handshake rejected: {:?}", defmt::Debug2Format(&e));
                SessionError::Handshake
            })?;
            self.client = Some(client);
            Ok(())
        }

        async fn send(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
            let client = self.client.as_mut().ok_or(SessionError::NotConnected)?;
            match client
                .send_message(topic, payload, QualityOfService::QoS0, false)
                .await
            {
                // published, nobody is listening
                Ok(()) | Err(ReasonCode::NoMatchingSubscribers) => Ok(()),
                Err(e) => {
                    error!("mqtt publish failed: {:?}", defmt::Debug2Format(&e));
                    Err(SessionError::Send)
                }
            }
        }

        async fn close(&mut self) {
            if let Some(mut client) = self.client.take() {
                if let Err(e) = client.disconnect().await {
                    warn!("mqtt disconnect failed: {:?}", defmt::Debug2Format(&e));
                }
            }
        }
    }
}
