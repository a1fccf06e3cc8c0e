//! Protocol lifecycle: bind a transport, connect, run the receive loop, disconnect.
//!
//! ```text
//! Disconnected --start--> Connected --spawn--> Receiving --EOF/error--> Disconnected
//!        ^                                         |
//!        +------------------stop-------------------+
//! ```

use crate::cursor::{ByteCursor, ByteOrder, CursorError};
use crate::decode::DecodedValue;
use crate::format::{FormatError, ParseInfo};
use crate::loader::ProfileRegistry;
use crate::metrics::CommMetrics;
use crate::plugin::{Plugin, PluginType, VisualizationType};
use crate::types::ProtocolConfig;
use crate::lock;
use robot_transport::{Transport, TransportError};
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("transport cannot be rebound while communication is active")]
    TransportBusy,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to spawn receive loop: {0}")]
    Spawn(std::io::Error),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProtocolState {
    Disconnected,
    Connected,
    Receiving,
}

/// One decoded value tagged with its datapool key.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEntry {
    pub key: String,
    pub value: DecodedValue,
}

/// Wire message produced by the receive loop: every configured data point, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    pub robot: String,
    pub entries: Vec<TelemetryEntry>,
    pub ts: Option<OffsetDateTime>,
}

pub type FrameSink = Arc<dyn Fn(TelemetryFrame) + Send + Sync>;

/// Lifecycle of a robot link, independent of how messages are shaped.
pub trait Protocol: Plugin + Send + Sync {
    /// Already-encoded outbound message.
    type Outbound;

    fn implementation_id(&self) -> &str;
    fn robot_name(&self) -> &str;
    fn state(&self) -> ProtocolState;

    /// Connect and start receiving. `Ok(false)` when no transport is bound.
    fn start_communication(&self) -> Result<bool, ProtocolError>;

    /// Disconnect; a no-op when nothing is connected.
    fn stop_communication(&self) -> Result<(), ProtocolError>;

    /// Forward a message to the transport. Dropped silently when no transport is bound.
    fn send_to_robot(&self, msg: &Self::Outbound) -> Result<(), ProtocolError>;

    /// First protocol declared by this robot's profile with the same implementation id.
    fn configuration<'a>(&self, profiles: &'a ProfileRegistry) -> Option<&'a ProtocolConfig> {
        profiles
            .lookup_robot(self.robot_name())?
            .protocol(self.implementation_id())
    }
}

/// How a receive loop ended.
#[derive(Debug)]
pub enum LoopExit {
    /// Stream closed on a frame boundary.
    Closed,
    /// Stream failed or closed mid-frame.
    Failed(FormatError),
}

/// Decodes frames from a byte stream and hands them to a sink.
#[derive(Clone)]
pub struct FrameReceiver {
    robot: String,
    parse_infos: Arc<Vec<ParseInfo>>,
    order: ByteOrder,
    sink: FrameSink,
    metrics: Option<CommMetrics>,
}

impl FrameReceiver {
    pub fn new(robot: &str, parse_infos: Vec<ParseInfo>, order: ByteOrder, sink: FrameSink) -> Self {
        Self {
            robot: robot.to_string(),
            parse_infos: Arc::new(parse_infos),
            order,
            sink,
            metrics: None,
        }
    }

    pub fn parse_infos(&self) -> &[ParseInfo] {
        &self.parse_infos
    }

    /// Run until the stream ends. Returns the number of frames emitted.
    pub fn receive<R: Read>(&self, mut stream: R) -> (u64, LoopExit) {
        if self.parse_infos.is_empty() {
            // Nothing to decode; keep the link drained until it closes.
            return match std::io::copy(&mut stream, &mut std::io::sink()) {
                Ok(_) => (0, LoopExit::Closed),
                Err(e) => (0, LoopExit::Failed(e.into())),
            };
        }
        let mut cursor = ByteCursor::with_order(stream, self.order);
        let mut frames = 0u64;
        loop {
            let frame_start = cursor.position();
            match self.decode_frame(&mut cursor) {
                Ok(frame) => {
                    frames += 1;
                    if let Some(m) = &self.metrics {
                        m.frames_rx.inc();
                    }
                    (self.sink)(frame);
                }
                Err(FormatError::Cursor(CursorError::Eof(at))) if at == frame_start => {
                    return (frames, LoopExit::Closed);
                }
                Err(e) => {
                    if let Some(m) = &self.metrics {
                        m.decode_errors.inc();
                    }
                    return (frames, LoopExit::Failed(e));
                }
            }
        }
    }

    fn decode_frame<R: Read>(&self, cursor: &mut ByteCursor<R>) -> Result<TelemetryFrame, FormatError> {
        let mut entries = Vec::with_capacity(self.parse_infos.len());
        for info in self.parse_infos.iter() {
            entries.push(TelemetryEntry {
                key: info.datapool_key.clone(),
                value: info.receive_format.decode(cursor)?,
            });
        }
        Ok(TelemetryFrame {
            robot: self.robot.clone(),
            entries,
            ts: Some(OffsetDateTime::now_utc()),
        })
    }
}

#[derive(Debug)]
struct LoopState {
    state: ProtocolState,
    generation: u64,
}

/// Protocol whose inbound frames are described by format strings.
pub struct FormatProtocol<T: Transport> {
    implementation: String,
    receiver: FrameReceiver,
    transport: Arc<Mutex<Option<T>>>,
    status: Arc<Mutex<LoopState>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T> FormatProtocol<T>
where
    T: Transport,
{
    pub fn new(implementation: &str, receiver: FrameReceiver) -> Self {
        Self {
            implementation: implementation.to_string(),
            receiver,
            transport: Arc::new(Mutex::new(None)),
            status: Arc::new(Mutex::new(LoopState {
                state: ProtocolState::Disconnected,
                generation: 0,
            })),
            worker: Mutex::new(None),
        }
    }

    /// Build from a profile entry.
    pub fn from_config(robot: &str, config: &ProtocolConfig, sink: FrameSink) -> Result<Self, FormatError> {
        let receiver = FrameReceiver::new(robot, config.parse_infos()?, config.byte_order(), sink);
        Ok(Self::new(&config.implementation, receiver))
    }

    pub fn with_metrics(mut self, metrics: CommMetrics) -> Self {
        self.receiver.metrics = Some(metrics);
        self
    }

    /// Bind the link. Only allowed while disconnected.
    pub fn set_transport(&self, transport: T) -> Result<(), ProtocolError> {
        // Lock order everywhere: transport before status.
        let mut slot = lock(&self.transport);
        if lock(&self.status).state != ProtocolState::Disconnected {
            return Err(ProtocolError::TransportBusy);
        }
        tracing::debug!(robot = %self.receiver.robot, endpoint = %transport.info(), "transport bound");
        *slot = Some(transport);
        Ok(())
    }

    pub fn has_transport(&self) -> bool {
        lock(&self.transport).is_some()
    }

    pub fn receiver(&self) -> &FrameReceiver {
        &self.receiver
    }

    fn set_state(&self, state: ProtocolState) {
        let mut status = lock(&self.status);
        status.state = state;
        status.generation += 1;
    }

    fn spawn_receiver(&self, stream: T::Stream) -> Result<JoinHandle<()>, ProtocolError> {
        let generation = {
            let mut status = lock(&self.status);
            status.state = ProtocolState::Receiving;
            status.generation += 1;
            status.generation
        };
        let receiver = self.receiver.clone();
        let transport = Arc::clone(&self.transport);
        let status = Arc::clone(&self.status);
        if let Some(m) = &receiver.metrics {
            m.active_connections.inc();
        }
        let spawned = std::thread::Builder::new()
            .name(format!("rx-{}", receiver.robot))
            .spawn(move || {
                let (frames, exit) = receiver.receive(stream);
                match exit {
                    LoopExit::Closed => {
                        tracing::info!(robot = %receiver.robot, frames, "receive loop closed")
                    }
                    LoopExit::Failed(e) => {
                        tracing::warn!(robot = %receiver.robot, frames, error = %e, "receive loop ended")
                    }
                }
                if let Some(m) = &receiver.metrics {
                    m.active_connections.dec();
                }
                // Lock order: transport before status.
                let mut slot = lock(&transport);
                let mut st = lock(&status);
                if st.generation != generation {
                    return;
                }
                // The loop ended on its own; take the link down with it.
                if let Some(t) = slot.as_mut().filter(|t| t.is_connected()) {
                    if let Err(e) = t.disconnect() {
                        tracing::warn!(robot = %receiver.robot, error = %e, "disconnect after loop end failed");
                    }
                }
                st.state = ProtocolState::Disconnected;
                st.generation += 1;
            });
        spawned.map_err(|e| {
            if let Some(m) = &self.receiver.metrics {
                m.active_connections.dec();
            }
            ProtocolError::Spawn(e)
        })
    }
}

impl<T: Transport> Plugin for FormatProtocol<T> {
    fn name(&self) -> &str {
        &self.implementation
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Protocol
    }

    fn visualization_type(&self) -> VisualizationType {
        VisualizationType::None
    }
}

impl<T: Transport> Protocol for FormatProtocol<T> {
    type Outbound = T::Frame;

    fn implementation_id(&self) -> &str {
        &self.implementation
    }

    fn robot_name(&self) -> &str {
        &self.receiver.robot
    }

    fn state(&self) -> ProtocolState {
        lock(&self.status).state
    }

    fn start_communication(&self) -> Result<bool, ProtocolError> {
        let mut worker = lock(&self.worker);
        if self.state() == ProtocolState::Receiving {
            return Ok(true);
        }
        if let Some(done) = worker.take() {
            let _ = done.join();
        }

        let stream = {
            let mut guard = lock(&self.transport);
            let Some(transport) = guard.as_mut() else {
                tracing::debug!(robot = %self.receiver.robot, "no transport bound; not starting");
                return Ok(false);
            };
            transport.connect()?;
            self.set_state(ProtocolState::Connected);
            match transport.stream() {
                Ok(s) => s,
                Err(e) => {
                    let _ = transport.disconnect();
                    self.set_state(ProtocolState::Disconnected);
                    return Err(e.into());
                }
            }
        };

        match self.spawn_receiver(stream) {
            Ok(handle) => {
                *worker = Some(handle);
                tracing::info!(
                    robot = %self.receiver.robot,
                    implementation = %self.implementation,
                    "communication started"
                );
                Ok(true)
            }
            Err(e) => {
                if let Some(t) = lock(&self.transport).as_mut() {
                    let _ = t.disconnect();
                }
                self.set_state(ProtocolState::Disconnected);
                Err(e)
            }
        }
    }

    fn stop_communication(&self) -> Result<(), ProtocolError> {
        let mut worker = lock(&self.worker);
        if let Some(transport) = lock(&self.transport).as_mut() {
            if transport.is_connected() {
                transport.disconnect()?;
                tracing::info!(robot = %self.receiver.robot, "communication stopped");
            }
        }
        // The stream reports end-of-stream once disconnected, so the loop finishes by itself.
        if let Some(handle) = worker.take() {
            // Dropping the last owner from inside the sink runs this on the loop thread.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
        self.set_state(ProtocolState::Disconnected);
        Ok(())
    }

    fn send_to_robot(&self, msg: &T::Frame) -> Result<(), ProtocolError> {
        let mut guard = lock(&self.transport);
        let Some(transport) = guard.as_mut() else {
            tracing::debug!(robot = %self.receiver.robot, "no transport bound; dropping message");
            return Ok(());
        };
        transport.send(msg)?;
        if let Some(m) = &self.receiver.metrics {
            m.messages_tx.inc();
        }
        Ok(())
    }
}

impl<T: Transport> Drop for FormatProtocol<T> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_communication() {
            tracing::warn!(robot = %self.receiver.robot, error = %e, "stop on drop failed");
        }
    }
}
