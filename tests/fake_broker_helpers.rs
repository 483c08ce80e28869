//! In-process fake MQTT 3.1.1 broker for integration tests
//!
//! Packets are framed with rumqttc's own v4 codec. The broker answers
//! CONNECT with a configurable return code and runs the QoS 1 and QoS 2
//! publish handshakes (or stays silent, on request). It also answers
//! PINGREQ and DISCONNECT, and records every CONNECT and PUBLISH.

#![allow(dead_code)]

use bytes::BytesMut;
use rumqttc::mqttbytes::v4::{
    self, ConnAck, Connect, ConnectReturnCode, Packet, PingResp, PubAck, PubComp, PubRec, Publish,
};
use rumqttc::mqttbytes::{Error as CodecError, QoS};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const MAX_PACKET_SIZE: usize = 64 * 1024;

/// One CONNECT as seen by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRecord {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u16,
}

impl From<&Connect> for ConnectRecord {
    fn from(connect: &Connect) -> Self {
        Self {
            client_id: connect.client_id.clone(),
            username: connect.login.as_ref().map(|login| login.username.clone()),
            password: connect.login.as_ref().map(|login| login.password.clone()),
            keep_alive_secs: connect.keep_alive,
        }
    }
}

/// One PUBLISH as seen by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRecord {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
}

impl From<&Publish> for PublishRecord {
    fn from(publish: &Publish) -> Self {
        Self {
            topic: publish.topic.clone(),
            payload: String::from_utf8_lossy(&publish.payload).into_owned(),
            qos: publish.qos as u8,
        }
    }
}

struct BrokerState {
    connack_code: AtomicU8,
    acknowledge_publishes: AtomicBool,
    connects: Mutex<Vec<ConnectRecord>>,
    publishes: Mutex<Vec<PublishRecord>>,
}

/// Fake broker listening on an ephemeral loopback port
pub struct FakeBroker {
    addr: SocketAddr,
    state: Arc<BrokerState>,
    kick_tx: watch::Sender<u64>,
    handle: JoinHandle<()>,
}

impl FakeBroker {
    /// Start a broker that accepts every connection
    pub async fn start() -> Self {
        Self::start_with_connack(0).await
    }

    /// Start a broker that answers every CONNECT with `code`
    pub async fn start_with_connack(code: u8) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake broker");
        let addr = listener.local_addr().expect("fake broker address");

        let state = Arc::new(BrokerState {
            connack_code: AtomicU8::new(code),
            acknowledge_publishes: AtomicBool::new(true),
            connects: Mutex::new(Vec::new()),
            publishes: Mutex::new(Vec::new()),
        });
        let (kick_tx, kick_rx) = watch::channel(0u64);

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                let mut kick_rx = kick_rx.clone();
                // Only kicks issued after this connection opened apply to it
                kick_rx.borrow_and_update();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, state, kick_rx).await;
                });
            }
        });

        Self {
            addr,
            state,
            kick_tx,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Change the return code for future CONNECTs
    pub fn set_connack_code(&self, code: u8) {
        self.state.connack_code.store(code, Ordering::SeqCst);
    }

    /// Record publishes without ever acknowledging them when `false`
    pub fn set_acknowledge_publishes(&self, acknowledge: bool) {
        self.state
            .acknowledge_publishes
            .store(acknowledge, Ordering::SeqCst);
    }

    /// Drop every open client connection without DISCONNECT
    pub fn kick_clients(&self) {
        self.kick_tx.send_modify(|generation| *generation += 1);
    }

    pub fn connects(&self) -> Vec<ConnectRecord> {
        self.state.connects.lock().unwrap().clone()
    }

    pub fn publishes(&self) -> Vec<PublishRecord> {
        self.state.publishes.lock().unwrap().clone()
    }

    /// Poll until at least `count` publishes arrived
    pub async fn wait_for_publishes(&self, count: usize, timeout: Duration) -> Vec<PublishRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let publishes = self.publishes();
            if publishes.len() >= count || tokio::time::Instant::now() >= deadline {
                return publishes;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until at least `count` CONNECTs arrived
    pub async fn wait_for_connects(&self, count: usize, timeout: Duration) -> Vec<ConnectRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let connects = self.connects();
            if connects.len() >= count || tokio::time::Instant::now() >= deadline {
                return connects;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.kick_clients();
        self.handle.abort();
    }
}

fn return_code(code: u8) -> ConnectReturnCode {
    match code {
        0 => ConnectReturnCode::Success,
        1 => ConnectReturnCode::RefusedProtocolVersion,
        2 => ConnectReturnCode::BadClientId,
        3 => ConnectReturnCode::ServiceUnavailable,
        4 => ConnectReturnCode::BadUserNamePassword,
        _ => ConnectReturnCode::NotAuthorized,
    }
}

fn codec_error(error: CodecError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error.to_string())
}

async fn serve_connection(
    mut stream: TcpStream,
    state: Arc<BrokerState>,
    mut kick_rx: watch::Receiver<u64>,
) -> io::Result<()> {
    let mut read_buf = BytesMut::with_capacity(4096);
    let mut write_buf = BytesMut::new();

    loop {
        let packet = tokio::select! {
            packet = read_packet(&mut stream, &mut read_buf) => packet?,
            _ = kick_rx.changed() => return Ok(()),
        };

        let Some(packet) = packet else {
            return Ok(());
        };

        match packet {
            Packet::Connect(connect) => {
                state.connects.lock().unwrap().push(ConnectRecord::from(&connect));
                let code = return_code(state.connack_code.load(Ordering::SeqCst));
                ConnAck::new(code, false)
                    .write(&mut write_buf)
                    .map_err(codec_error)?;
                stream.write_all(&write_buf.split()).await?;
                if code != ConnectReturnCode::Success {
                    return Ok(());
                }
            }
            Packet::Publish(publish) => {
                state.publishes.lock().unwrap().push(PublishRecord::from(&publish));
                if !state.acknowledge_publishes.load(Ordering::SeqCst) {
                    continue;
                }
                let written = match publish.qos {
                    QoS::AtMostOnce => continue,
                    QoS::AtLeastOnce => PubAck::new(publish.pkid).write(&mut write_buf),
                    QoS::ExactlyOnce => PubRec::new(publish.pkid).write(&mut write_buf),
                };
                written.map_err(codec_error)?;
                stream.write_all(&write_buf.split()).await?;
            }
            Packet::PubRel(pubrel) => {
                PubComp::new(pubrel.pkid)
                    .write(&mut write_buf)
                    .map_err(codec_error)?;
                stream.write_all(&write_buf.split()).await?;
            }
            Packet::PingReq => {
                PingResp.write(&mut write_buf).map_err(codec_error)?;
                stream.write_all(&write_buf.split()).await?;
            }
            Packet::Disconnect => return Ok(()),
            _ => {}
        }
    }
}

/// Next complete packet from the stream; `None` on clean EOF
async fn read_packet(stream: &mut TcpStream, buf: &mut BytesMut) -> io::Result<Option<Packet>> {
    loop {
        match v4::read(buf, MAX_PACKET_SIZE) {
            Ok(packet) => return Ok(Some(packet)),
            Err(CodecError::InsufficientBytes(_)) => {}
            Err(e) => return Err(codec_error(e)),
        }

        if stream.read_buf(buf).await? == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(io::ErrorKind::UnexpectedEof.into())
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_record_from_packet() {
        let mut connect = Connect::new("t-1");
        connect.set_login("u", "p");
        connect.keep_alive = 60;

        let mut buf = BytesMut::new();
        connect.write(&mut buf).unwrap();
        let Packet::Connect(decoded) = v4::read(&mut buf, MAX_PACKET_SIZE).unwrap() else {
            panic!("expected CONNECT");
        };

        let record = ConnectRecord::from(&decoded);
        assert_eq!(record.client_id, "t-1");
        assert_eq!(record.username.as_deref(), Some("u"));
        assert_eq!(record.password.as_deref(), Some("p"));
        assert_eq!(record.keep_alive_secs, 60);
    }

    #[test]
    fn test_truncated_packet_waits_for_more_bytes() {
        let mut publish = Publish::new("/hi", QoS::ExactlyOnce, "messages: 0");
        publish.pkid = 7;
        let mut full = BytesMut::new();
        publish.write(&mut full).unwrap();
        let mut partial = BytesMut::from(&full[..full.len() - 3]);

        assert!(matches!(
            v4::read(&mut partial, MAX_PACKET_SIZE),
            Err(CodecError::InsufficientBytes(_))
        ));
    }
}
