//! VISCA over IP protocol variant
//!
//! Sony VISCA command/inquiry exchange over UDP (port 52381). Every packet
//! carries an 8-byte VISCA-IP header (message type, payload length, sequence
//! number) ahead of the serial payload (`0x81 ... 0xFF`).
//!
//! A SET walks an explicit state machine: `Sent -> AwaitingAck ->
//! AwaitingCompletion -> {Done | TimedOut}`. The ACK (`90 4z FF`) confirms
//! the camera accepted the command; only the completion (`90 5z FF`)
//! confirms the value was applied. An error reply (`90 6z FF`) is a
//! protocol-level rejection and is never retried.

use super::types::{CommandOutcome, CommandResult};
use super::CameraProtocol;
use crate::config_store::{CameraEndpoint, ViscaConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Device address 1, reply header = address + 8
const REPLY_HEADER: u8 = 0x90;

/// SET command lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetCommandState {
    Sent,
    AwaitingAck,
    AwaitingCompletion,
    Done,
    TimedOut,
}

/// How a parameter value is carried in the VISCA payload
#[derive(Debug, Clone, Copy)]
enum ValueWidth {
    /// Single low nibble byte (DigitalBrightLevel)
    SingleByte,
    /// Four nibbles `0p 0q 0r 0s` (direct set/inquiry commands)
    FourNibble,
}

/// One entry of the Sony SRG-XB25/XP1 command map
#[derive(Debug, Clone, Copy)]
struct ViscaCommand {
    category: u8,
    width: ValueWidth,
}

impl ViscaCommand {
    fn encode_inquiry(&self) -> Vec<u8> {
        vec![0x81, 0x09, 0x04, self.category, 0xFF]
    }

    fn encode_set(&self, value: i64) -> Vec<u8> {
        match self.width {
            ValueWidth::FourNibble => {
                let v = value.clamp(0, 0xFFFF) as u16;
                vec![
                    0x81,
                    0x01,
                    0x04,
                    self.category,
                    ((v >> 12) & 0x0F) as u8,
                    ((v >> 8) & 0x0F) as u8,
                    ((v >> 4) & 0x0F) as u8,
                    (v & 0x0F) as u8,
                    0xFF,
                ]
            }
            ValueWidth::SingleByte => {
                vec![0x81, 0x01, 0x04, self.category, value.clamp(0, 15) as u8, 0xFF]
            }
        }
    }
}

/// Command map for the exposure parameters this system drives
fn command_for(name: &str) -> Option<ViscaCommand> {
    let (category, width) = match name {
        "ExposureGain" => (0x4C, ValueWidth::FourNibble),
        "ExposureExposureTime" => (0x4A, ValueWidth::FourNibble),
        "ExposureIris" => (0x4B, ValueWidth::FourNibble),
        "ColorSaturation" => (0x49, ValueWidth::FourNibble),
        "DigitalBrightLevel" => (0x3E, ValueWidth::SingleByte),
        _ => return None,
    };
    Some(ViscaCommand { category, width })
}

/// Classified reply payload
#[derive(Debug, Clone, PartialEq, Eq)]
enum ViscaReply {
    Ack,
    Completion,
    ErrorReply,
    Other,
}

fn classify_reply(payload: &[u8]) -> ViscaReply {
    if payload.len() < 3 || payload[0] != REPLY_HEADER {
        return ViscaReply::Other;
    }
    match payload[1] & 0xF0 {
        0x40 => ViscaReply::Ack,
        0x50 => ViscaReply::Completion,
        0x60 => ViscaReply::ErrorReply,
        _ => ViscaReply::Other,
    }
}

/// Parse an inquiry reply `90 50 ... FF` into a value.
///
/// 4-byte replies carry a single byte, 7-byte replies carry four nibbles
/// `(p<<12)|(q<<8)|(r<<4)|s`.
fn parse_inquiry_value(payload: &[u8]) -> Option<i64> {
    if payload.len() < 3 || payload[0] != REPLY_HEADER || payload[1] != 0x50 {
        return None;
    }
    match payload.len() {
        4 => Some(payload[2] as i64),
        7 => {
            let p = (payload[2] & 0x0F) as i64;
            let q = (payload[3] & 0x0F) as i64;
            let r = (payload[4] & 0x0F) as i64;
            let s = (payload[5] & 0x0F) as i64;
            Some((p << 12) | (q << 8) | (r << 4) | s)
        }
        _ => None,
    }
}

/// What came back from one recv against a deadline
enum RecvOutcome {
    Payload(Vec<u8>),
    Deadline,
    Fault(std::io::Error),
}

/// VISCA protocol instance for one camera
pub struct ViscaProtocol {
    host: String,
    port: u16,
    config: ViscaConfig,
    /// Transaction lock: one command/reply exchange at a time per socket
    socket: Mutex<Option<UdpSocket>>,
    sequence: AtomicU32,
    connected: AtomicBool,
}

impl ViscaProtocol {
    /// Create a VISCA protocol instance for one camera endpoint
    pub fn new(endpoint: &CameraEndpoint, config: ViscaConfig) -> Self {
        Self {
            host: endpoint.host(),
            port: config.port,
            config,
            socket: Mutex::new(None),
            sequence: AtomicU32::new(0),
            connected: AtomicBool::new(false),
        }
    }

    async fn open_socket(&self) -> Result<UdpSocket> {
        // Ephemeral local port so multiple camera instances coexist;
        // the camera replies to whatever source port we used
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| Error::Connection(format!("VISCA bind failed: {}", e)))?;
        socket
            .connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| Error::Connection(format!("VISCA connect to {} failed: {}", self.host, e)))?;
        Ok(socket)
    }

    /// Build the VISCA-IP packet: 2-byte message type (0x0100 command,
    /// 0x0110 inquiry), 2-byte payload length, 4-byte sequence number.
    fn build_packet(&self, payload: &[u8]) -> Vec<u8> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let msg_type: u16 = if payload.len() >= 2 && payload[1] == 0x09 {
            0x0110
        } else {
            0x0100
        };
        let mut packet = Vec::with_capacity(8 + payload.len());
        packet.extend_from_slice(&msg_type.to_be_bytes());
        packet.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        packet.extend_from_slice(&seq.to_be_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    /// Discard stale datagrams left over from an abandoned exchange
    fn drain_stale(socket: &UdpSocket) {
        let mut buf = [0u8; 64];
        while socket.try_recv(&mut buf).is_ok() {}
    }

    async fn recv_payload(socket: &UdpSocket, deadline: Instant) -> RecvOutcome {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return RecvOutcome::Deadline;
            }
            let mut buf = [0u8; 64];
            match tokio::time::timeout(remaining, socket.recv(&mut buf)).await {
                Ok(Ok(n)) if n > 8 => return RecvOutcome::Payload(buf[8..n].to_vec()),
                // Runt datagram, keep listening until the deadline
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return RecvOutcome::Fault(e),
                Err(_) => return RecvOutcome::Deadline,
            }
        }
    }

    async fn reconnect(&self, slot: &mut Option<UdpSocket>) -> Result<()> {
        tracing::warn!(host = %self.host, "VISCA socket fault, reconnecting");
        *slot = Some(self.open_socket().await?);
        Ok(())
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.config.retry_delay_ms)
    }
}

#[async_trait]
impl CameraProtocol for ViscaProtocol {
    async fn connect(&self) -> Result<()> {
        let mut slot = self.socket.lock().await;
        if slot.is_none() {
            *slot = Some(self.open_socket().await?);
        }
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(host = %self.host, port = self.port, "VISCA UDP endpoint ready");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut slot = self.socket.lock().await;
        *slot = None;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get_parameter(&self, name: &str) -> CommandResult {
        let Some(command) = command_for(name) else {
            tracing::warn!(parameter = %name, "unknown VISCA parameter");
            return CommandResult::failed(name, None, CommandOutcome::Rejected);
        };
        let payload = command.encode_inquiry();

        let mut slot = self.socket.lock().await;
        let mut fault_retried = false;
        let attempts = 1 + self.config.max_retries;

        for attempt in 1..=attempts {
            let send_result = match slot.as_ref() {
                Some(socket) => {
                    Self::drain_stale(socket);
                    socket.send(&self.build_packet(&payload)).await
                }
                None => return CommandResult::failed(name, None, CommandOutcome::Error),
            };
            if let Err(e) = send_result {
                tracing::warn!(host = %self.host, error = %e, "VISCA send failed");
                if !fault_retried && self.reconnect(&mut slot).await.is_ok() {
                    fault_retried = true;
                    continue;
                }
                return CommandResult::failed(name, None, CommandOutcome::Error);
            }

            let deadline = Instant::now() + self.timeout();
            'receive: loop {
                let outcome = match slot.as_ref() {
                    Some(socket) => Self::recv_payload(socket, deadline).await,
                    None => return CommandResult::failed(name, None, CommandOutcome::Error),
                };
                match outcome {
                    RecvOutcome::Payload(reply) => match classify_reply(&reply) {
                        ViscaReply::Completion => match parse_inquiry_value(&reply) {
                            Some(value) => return CommandResult::read(name, value),
                            None => {
                                tracing::warn!(
                                    parameter = %name,
                                    reply = ?reply,
                                    "malformed VISCA inquiry reply"
                                );
                                return CommandResult::failed(name, None, CommandOutcome::Rejected);
                            }
                        },
                        ViscaReply::ErrorReply => {
                            return CommandResult::failed(name, None, CommandOutcome::Rejected)
                        }
                        _ => continue,
                    },
                    RecvOutcome::Deadline => break 'receive,
                    RecvOutcome::Fault(e) => {
                        tracing::warn!(host = %self.host, error = %e, "VISCA recv failed");
                        if !fault_retried && self.reconnect(&mut slot).await.is_ok() {
                            fault_retried = true;
                            break 'receive;
                        }
                        return CommandResult::failed(name, None, CommandOutcome::Error);
                    }
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.retry_delay()).await;
            }
        }

        tracing::debug!(host = %self.host, parameter = %name, "VISCA inquiry timed out");
        CommandResult::failed(name, None, CommandOutcome::Timeout)
    }

    async fn set_parameter(&self, name: &str, value: i64) -> CommandResult {
        let Some(command) = command_for(name) else {
            tracing::warn!(parameter = %name, "unknown VISCA parameter");
            return CommandResult::failed(name, Some(value), CommandOutcome::Rejected);
        };
        let payload = command.encode_set(value);

        let mut slot = self.socket.lock().await;
        let mut fault_retried = false;
        let attempts = 1 + self.config.max_retries;

        for attempt in 1..=attempts {
            let send_result = match slot.as_ref() {
                Some(socket) => {
                    Self::drain_stale(socket);
                    socket.send(&self.build_packet(&payload)).await
                }
                None => return CommandResult::failed(name, Some(value), CommandOutcome::Error),
            };
            if let Err(e) = send_result {
                tracing::warn!(host = %self.host, error = %e, "VISCA send failed");
                if !fault_retried && self.reconnect(&mut slot).await.is_ok() {
                    fault_retried = true;
                    continue;
                }
                return CommandResult::failed(name, Some(value), CommandOutcome::Error);
            }
            let mut state = SetCommandState::Sent;
            tracing::trace!(parameter = %name, attempt, state = ?state, "VISCA set dispatched");
            state = SetCommandState::AwaitingAck;

            let deadline = Instant::now() + self.timeout();
            while matches!(
                state,
                SetCommandState::AwaitingAck | SetCommandState::AwaitingCompletion
            ) {
                let outcome = match slot.as_ref() {
                    Some(socket) => Self::recv_payload(socket, deadline).await,
                    None => return CommandResult::failed(name, Some(value), CommandOutcome::Error),
                };
                match outcome {
                    RecvOutcome::Payload(reply) => match classify_reply(&reply) {
                        ViscaReply::Ack => state = SetCommandState::AwaitingCompletion,
                        // Some commands complete without a separate ACK
                        ViscaReply::Completion => state = SetCommandState::Done,
                        ViscaReply::ErrorReply => {
                            tracing::warn!(
                                parameter = %name,
                                requested = value,
                                "VISCA rejected set command"
                            );
                            return CommandResult::failed(name, Some(value), CommandOutcome::Rejected);
                        }
                        ViscaReply::Other => {}
                    },
                    RecvOutcome::Deadline => state = SetCommandState::TimedOut,
                    RecvOutcome::Fault(e) => {
                        tracing::warn!(host = %self.host, error = %e, "VISCA recv failed");
                        if !fault_retried && self.reconnect(&mut slot).await.is_ok() {
                            fault_retried = true;
                            state = SetCommandState::TimedOut;
                        } else {
                            return CommandResult::failed(name, Some(value), CommandOutcome::Error);
                        }
                    }
                }
            }

            if state == SetCommandState::Done {
                return CommandResult::applied(name, value);
            }

            if attempt < attempts {
                tokio::time::sleep(self.retry_delay()).await;
            }
        }

        tracing::debug!(host = %self.host, parameter = %name, "VISCA set timed out");
        CommandResult::failed(name, Some(value), CommandOutcome::Timeout)
    }

    async fn apply_preset(&self, pairs: &[(String, String)]) -> Result<()> {
        for (param, raw) in pairs {
            // VISCA can only express the numeric commands in its map
            let Some(_) = command_for(param) else {
                tracing::debug!(parameter = %param, "preset entry not expressible over VISCA, skipped");
                continue;
            };
            let Ok(value) = raw.parse::<i64>() else {
                tracing::debug!(parameter = %param, value = %raw, "non-numeric preset entry skipped");
                continue;
            };
            let result = self.set_parameter(param, value).await;
            if !result.outcome.is_ok() {
                return Err(Error::Connection(format!(
                    "preset push of {} to {} failed",
                    param, self.host
                )));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(())
    }
}
