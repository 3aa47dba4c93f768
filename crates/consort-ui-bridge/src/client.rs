//! The UI end of the bridge: one loopback UDP socket talking to the host's
//! callback endpoint.

use crate::{ClientError, Result};
use consort_plugin::ui_bridge::{decode_packet, Endpoint, HostUiMessage, UiMessage, MAX_PACKET_SIZE};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// OSC path the host addresses this UI under.
pub const UI_PATH: &str = "/ui";

/// Command line of a UI process: `<host-url> <filename> <label> <title>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiArgs {
    pub host_url: String,
    pub filename: String,
    pub label: String,
    pub title: String,
}

impl UiArgs {
    /// Parse arguments after the program name.
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        let mut next = |what: &str| {
            args.next()
                .ok_or_else(|| ClientError::Usage(format!("missing <{what}>, expected <host-url> <filename> <label> <title>")))
        };
        Ok(Self {
            host_url: next("host-url")?,
            filename: next("filename")?,
            label: next("label")?,
            title: next("title")?,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::parse(std::env::args().skip(1))
    }
}

pub struct UiClient {
    socket: UdpSocket,
    host: Endpoint,
    own: Endpoint,
    buf: Vec<u8>,
    pending: VecDeque<HostUiMessage>,
}

impl UiClient {
    pub async fn connect(host_url: &str) -> Result<Self> {
        let host = Endpoint::parse(host_url)?;
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let own = Endpoint::new(socket.local_addr()?, UI_PATH);
        tracing::debug!("UI socket {} for host {}", own, host);

        Ok(Self {
            socket,
            host,
            own,
            buf: vec![0; MAX_PACKET_SIZE],
            pending: VecDeque::new(),
        })
    }

    /// Where the host should send to; carried by `update`.
    pub fn url(&self) -> String {
        self.own.url()
    }

    pub fn host(&self) -> &Endpoint {
        &self.host
    }

    pub async fn send(&self, message: &UiMessage) -> Result<()> {
        let bytes = message.encode(&self.host.path)?;
        self.socket.send_to(&bytes, self.host.addr).await?;
        Ok(())
    }

    /// The handshake.
    pub async fn send_update(&self) -> Result<()> {
        self.send(&UiMessage::Update { url: self.url() }).await
    }

    pub async fn send_configure(&self, key: &str, value: &str) -> Result<()> {
        self.send(&UiMessage::Configure {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await
    }

    pub async fn send_control(&self, index: i32, value: f32) -> Result<()> {
        self.send(&UiMessage::Control { index, value }).await
    }

    pub async fn send_program(&self, bank: i32, program: i32) -> Result<()> {
        self.send(&UiMessage::Program { bank, program }).await
    }

    pub async fn send_midi(&self, data: [u8; 4]) -> Result<()> {
        self.send(&UiMessage::Midi(data)).await
    }

    pub async fn send_exiting(&self) -> Result<()> {
        self.send(&UiMessage::Exiting).await
    }

    /// Next message from the host. Datagrams from other senders and
    /// malformed messages are logged and skipped.
    pub async fn recv(&mut self) -> Result<HostUiMessage> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(message);
            }

            let (len, source) = self.socket.recv_from(&mut self.buf).await?;
            if source != self.host.addr {
                tracing::debug!("Dropping datagram from {}", source);
                continue;
            }

            let messages = match decode_packet(&self.buf[..len]) {
                Ok(messages) => messages,
                Err(err) => {
                    tracing::warn!("{}", err);
                    continue;
                }
            };
            for message in messages {
                match HostUiMessage::decode(&message, &self.own.path) {
                    Ok(message) => self.pending.push_back(message),
                    Err(err) => tracing::warn!("{}", err),
                }
            }
        }
    }

    pub async fn recv_timeout(&mut self, wait: Duration) -> Result<HostUiMessage> {
        tokio::time::timeout(wait, self.recv())
            .await
            .map_err(|_| ClientError::Timeout(wait))?
    }
}
