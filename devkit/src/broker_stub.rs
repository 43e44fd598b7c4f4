/*!
Broker MQTT minimal sur TCP pour tests

Parle juste assez de MQTT 3.1.1 pour un client rumqttc : CONNACK, SUBACK,
PINGRESP. Après chaque SUBSCRIBE il rejoue les messages retenus en QoS 1
(retain=1) et enregistre les PUBACK reçus.
*/

use anyhow::{bail, Result};
use bytes::BytesMut;
use rumqttc::mqttbytes::v4::{
    read, ConnAck, ConnectReturnCode, Packet, PingResp, Publish, SubAck, SubscribeReasonCode,
};
use rumqttc::QoS;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const MAX_PACKET: usize = 64 * 1024;

#[derive(Default)]
struct Recorded {
    connections: usize,
    subscriptions: Vec<String>,
    acked: Vec<u16>,
}

/// Broker de test écoutant sur 127.0.0.1, port éphémère
pub struct FakeBroker {
    port: u16,
    recorded: Arc<Mutex<Recorded>>,
    task: JoinHandle<()>,
}

impl FakeBroker {
    /// Démarre le broker avec les messages retenus `(topic, payload)`
    pub async fn start(retained: Vec<(String, Vec<u8>)>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let recorded = Arc::new(Mutex::new(Recorded::default()));

        let shared = recorded.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                shared.lock().unwrap().connections += 1;
                if let Err(e) = serve_connection(socket, &retained, &shared).await {
                    tracing::debug!("fake broker connection ended: {e}");
                }
            }
        });

        Ok(Self { port, recorded, task })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connections(&self) -> usize {
        self.recorded.lock().unwrap().connections
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.recorded.lock().unwrap().subscriptions.clone()
    }

    /// Identifiants des PUBACK reçus, dans l'ordre d'arrivée
    pub fn acked(&self) -> Vec<u16> {
        self.recorded.lock().unwrap().acked.clone()
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn next_packet(socket: &mut TcpStream, buf: &mut BytesMut) -> Result<Option<Packet>> {
    loop {
        match read(buf, MAX_PACKET) {
            Ok(packet) => return Ok(Some(packet)),
            Err(rumqttc::mqttbytes::Error::InsufficientBytes(_)) => {
                if socket.read_buf(buf).await? == 0 {
                    return Ok(None);
                }
            }
            Err(e) => bail!("malformed packet: {e}"),
        }
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    retained: &[(String, Vec<u8>)],
    recorded: &Mutex<Recorded>,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(4096);

    while let Some(packet) = next_packet(&mut socket, &mut buf).await? {
        let mut out = BytesMut::new();
        match packet {
            Packet::Connect(_) => {
                ConnAck::new(ConnectReturnCode::Success, false).write(&mut out)?;
            }
            Packet::Subscribe(sub) => {
                let codes = sub
                    .filters
                    .iter()
                    .map(|f| SubscribeReasonCode::Success(f.qos))
                    .collect();
                recorded
                    .lock()
                    .unwrap()
                    .subscriptions
                    .extend(sub.filters.iter().map(|f| f.path.clone()));
                SubAck::new(sub.pkid, codes).write(&mut out)?;

                for (i, (topic, payload)) in retained.iter().enumerate() {
                    let mut publish = Publish::new(topic.as_str(), QoS::AtLeastOnce, payload.clone());
                    publish.retain = true;
                    publish.pkid = i as u16 + 1;
                    publish.write(&mut out)?;
                }
            }
            Packet::PubAck(ack) => recorded.lock().unwrap().acked.push(ack.pkid),
            Packet::PingReq => {
                PingResp.write(&mut out)?;
            }
            Packet::Disconnect => return Ok(()),
            _ => {}
        }

        if !out.is_empty() {
            socket.write_all(&out).await?;
        }
    }
    Ok(())
}
