//! End-to-end tests against a fake drone on the loopback interface
//!
//! The fake drone is a plain tokio socket: it acknowledges the arming
//! command, broadcasts state and streams a small H.264 sequence, exactly
//! like the real aircraft does over its access point.

use anyhow::{Context, Result, ensure};
use dronelink::video::{DecodeFailure, EncodedSample};
use dronelink::{
    DatagramTransport, DecodedFrame, DecoderBackend, DecompressionSession, DroneConfig,
    DroneConnection, FormatDescription, Transports, UdpEndpoint, UpdateRate,
};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

// Baseline 960x720 parameter sets, as the drone sends them
const SPS: [u8; 9] = [0x67, 0x42, 0xC0, 0x1F, 0xDA, 0x03, 0xC0, 0x5B, 0x90];
const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

fn annexb(nals: &[&[u8]]) -> Vec<u8> {
    nals.iter().flat_map(|nal| [0u8, 0, 0, 1].into_iter().chain(nal.iter().copied())).collect()
}

fn slice(header: u8, len: usize) -> Vec<u8> {
    std::iter::once(header).chain((0..len).map(|i| (i % 200) as u8 + 1)).collect()
}

/// Backend producing grey frames of the stream's size.
struct GreyBackend;

struct GreySession {
    width: u32,
    height: u32,
}

impl DecoderBackend for GreyBackend {
    fn name(&self) -> &'static str {
        "grey"
    }

    fn create_session(
        &mut self,
        format: &FormatDescription,
    ) -> dronelink::Result<Box<dyn DecompressionSession>> {
        Ok(Box::new(GreySession { width: format.width(), height: format.height() }))
    }
}

impl DecompressionSession for GreySession {
    fn decode(&mut self, sample: &EncodedSample) -> Result<DecodedFrame, DecodeFailure> {
        let pixels = vec![0x80; DecodedFrame::expected_len(self.width, self.height)];
        Ok(DecodedFrame::new(self.width, self.height, pixels, sample.sequence))
    }
}

struct FakeDrone {
    socket: UdpSocket,
}

impl FakeDrone {
    async fn bind() -> Result<Self> {
        Ok(Self { socket: UdpSocket::bind("127.0.0.1:0").await? })
    }

    fn port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Next command text and the address it came from.
    async fn next_command(&self) -> Result<(String, SocketAddr)> {
        let mut buf = [0u8; 256];
        let (len, from) = tokio::time::timeout(Duration::from_secs(5), self.socket.recv_from(&mut buf))
            .await
            .context("no command from the application")??;
        Ok((String::from_utf8_lossy(&buf[..len]).into_owned(), from))
    }

    /// Wait for `expected`, skipping joystick keep-alives.
    async fn expect_command(&self, expected: &str) -> Result<SocketAddr> {
        loop {
            let (command, from) = self.next_command().await?;
            if command == expected {
                return Ok(from);
            }
            ensure!(command.starts_with("rc "), "unexpected command {:?}", command);
        }
    }
}

async fn loopback_connection(drone: &FakeDrone) -> Result<(DroneConnection, SocketAddr, SocketAddr)> {
    let mut config = DroneConfig::default();
    config.network.drone_host = "127.0.0.1".to_string();
    config.network.command_port = drone.port()?;
    config.command.auto_stream = false;

    let command = UdpEndpoint::connect("127.0.0.1", drone.port()?).await?;
    let telemetry = UdpEndpoint::listen("127.0.0.1", 0).await?;
    let video = UdpEndpoint::listen("127.0.0.1", 0).await?;
    let (telemetry_addr, video_addr) = (telemetry.local_addr(), video.local_addr());

    let transports = Transports {
        command: Arc::new(command) as Arc<dyn DatagramTransport>,
        telemetry: Arc::new(telemetry),
        video: Arc::new(video),
    };
    let connection =
        DroneConnection::builder(config).transports(transports).decoder(GreyBackend).connect().await?;
    Ok((connection, telemetry_addr, video_addr))
}

#[tokio::test]
async fn fly_and_watch_over_udp() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let drone = FakeDrone::bind().await?;
    let (connection, telemetry_addr, video_addr) = loopback_connection(&drone).await?;

    // Arming handshake
    let app = drone.expect_command("command").await?;
    drone.socket.send_to(b"ok", app).await?;
    connection.session().wait_armed(Duration::from_secs(5)).await?;

    // State broadcast
    drone.socket.send_to(b"pitch:0;roll:0;yaw:0;bat:64;h:0;\r\n", telemetry_addr).await?;
    tokio::time::timeout(Duration::from_secs(5), async {
        while connection.battery().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("battery never reported")?;
    assert_eq!(connection.battery().as_deref(), Some("64"));

    // Flight commands reach the drone in order
    connection.session().takeoff()?;
    connection.session().land()?;
    drone.expect_command("takeoff").await?;
    drone.expect_command("land").await?;

    // Video: one keyframe spanning several datagrams, then two P frames
    let mut frames = Box::pin(connection.subscribe_frames(UpdateRate::Native)?);
    let idr = slice(0x65, 5000);
    let units = [
        annexb(&[SPS.as_slice(), PPS.as_slice(), idr.as_slice()]),
        annexb(&[slice(0x41, 700).as_slice()]),
        annexb(&[slice(0x41, 800).as_slice()]),
    ];
    for unit in &units {
        for chunk in unit.chunks(1460) {
            drone.socket.send_to(chunk, video_addr).await?;
        }
    }

    let last = tokio::time::timeout(Duration::from_secs(5), async {
        let mut last = None;
        while let Some(frame) = frames.next().await {
            let done = frame.sequence == units.len() as u64;
            last = Some(frame);
            if done {
                break;
            }
        }
        last
    })
    .await
    .context("frames never decoded")?
    .context("frame stream ended")?;
    assert_eq!((last.width, last.height), (960, 720));

    let closed = connection.disconnect().await?;
    let stats = closed.decoder.context("video was running")?;
    assert_eq!(stats.frames, 3);
    assert_eq!(stats.sessions_created, 1);
    Ok(())
}

#[tokio::test]
async fn unreachable_host_fails_before_connecting() {
    let mut config = DroneConfig::default();
    config.network.drone_host = "drone.invalid".to_string();

    let result = DroneConnection::builder(config).connect().await;
    assert!(matches!(result, Err(dronelink::DroneError::AddressResolution { .. })));
}
