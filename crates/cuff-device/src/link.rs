//! Development link transport.
//!
//! A TCP listener standing in for the radio characteristic pair: the same
//! length-prefixed frames flow in both directions, one controller at a time.
//! Inbound frames are posted to the loop as [`Inbound`] messages; outbound
//! frames come from a [`FrameSink`] over a channel.

use std::io;

use cuff_core::protocol::{send_message, FrameAssembler};
use cuff_core::{DeviceMessage, EventSink};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::runtime::Inbound;

/// Default listen address.
pub const DEFAULT_LINK_ADDR: &str = "0.0.0.0:7878";

/// Frames the link may hold before the sink starts dropping.
pub const OUTBOUND_QUEUE_LEN: usize = 64;

const READ_BUFFER_LEN: usize = 1024;

/// Encodes controller events into frames for the link task.
///
/// Never blocks the loop. A frame that finds the queue full or the link gone
/// is dropped and logged, the same way a refused radio notification is.
#[derive(Debug, Clone)]
pub struct FrameSink {
    outbound: mpsc::Sender<Vec<u8>>,
}

impl FrameSink {
    /// Send frames to `outbound`, usually a channel of
    /// [`OUTBOUND_QUEUE_LEN`] frames.
    #[must_use]
    pub const fn new(outbound: mpsc::Sender<Vec<u8>>) -> Self {
        Self { outbound }
    }
}

impl EventSink for FrameSink {
    fn emit(&mut self, message: DeviceMessage) {
        let outbound = &self.outbound;
        send_message(&message, |frame| match outbound.try_send(frame.to_vec()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(event = message.event.name(), "link queue full, dropping frame");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(event = message.event.name(), "link closed, dropping frame");
            }
        });
    }
}

/// Accept controllers on `listener` until the loop goes away.
///
/// One controller is served at a time. Each accepted connection is announced
/// to the loop with [`Inbound::Connected`] and its end with
/// [`Inbound::Disconnected`]; complete frames read in between are posted as
/// [`Inbound::Frame`].
///
/// # Arguments
///
/// * `listener` - Bound TCP listener
/// * `inbound` - The loop's inbox
/// * `outbound` - Frames produced by a [`FrameSink`]
///
/// # Shutdown
///
/// Returns `Ok(())` once the loop drops either end of its channels. Outbound
/// frames produced while nobody is connected are discarded.
///
/// # Errors
///
/// Returns an error if accepting a connection fails. Errors on an accepted
/// connection only end that connection.
pub async fn serve(
    listener: TcpListener,
    inbound: mpsc::UnboundedSender<Inbound>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
) -> io::Result<()> {
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            frame = outbound.recv() => {
                if frame.is_none() {
                    return Ok(());
                }
                continue;
            }
        };

        info!(%peer, "link accepted");
        if inbound.send(Inbound::Connected).is_err() {
            return Ok(());
        }

        match connection(stream, &inbound, &mut outbound).await {
            Ok(()) => info!(%peer, "link closed"),
            Err(e) => warn!(%peer, error = %e, "link failed"),
        }

        if inbound.send(Inbound::Disconnected).is_err() {
            return Ok(());
        }
    }
}

// Reading and writing run side by side; a peer that stops reading cannot
// hold up its own inbound frames.
async fn connection(
    stream: TcpStream,
    inbound: &mpsc::UnboundedSender<Inbound>,
    outbound: &mut mpsc::Receiver<Vec<u8>>,
) -> io::Result<()> {
    let (reader, writer) = stream.into_split();
    tokio::select! {
        read = read_frames(reader, inbound) => read,
        written = write_frames(writer, outbound) => written,
    }
}

async fn read_frames(
    mut reader: OwnedReadHalf,
    inbound: &mpsc::UnboundedSender<Inbound>,
) -> io::Result<()> {
    let mut assembler = FrameAssembler::new();
    let mut buf = [0u8; READ_BUFFER_LEN];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        assembler.push(&buf[..n]);
        while let Some(frame) = assembler.next_frame() {
            if inbound.send(Inbound::Frame(frame)).is_err() {
                return Ok(());
            }
        }
    }
}

async fn write_frames(
    mut writer: OwnedWriteHalf,
    outbound: &mut mpsc::Receiver<Vec<u8>>,
) -> io::Result<()> {
    while let Some(frame) = outbound.recv().await {
        writer.write_all(&frame).await?;
    }
    Ok(())
}
