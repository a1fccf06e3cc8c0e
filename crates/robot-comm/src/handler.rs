//! Bridge between wire messages and datapool messages.
//!
//! Protocols and datapool consumers never see each other's message types; a
//! [`MessageConverter`] translates in both directions and the [`MessageHandler`] routes
//! the results.

use crate::cursor::ByteOrder;
use crate::datapool::{Datapool, DatapoolMessage, DatapoolResolver};
use crate::format::{FormatError, FormatSpec};
use crate::lock;
use crate::metrics::CommMetrics;
use crate::plugin::{Plugin, PluginType, VisualizationType};
use crate::protocol::{Protocol, ProtocolError, TelemetryFrame};
use crate::types::ProtocolConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

/// Translation in both directions. Either side may fan out to any number of messages.
pub trait MessageConverter: Send + Sync {
    type Wire: 'static;
    type Outbound: 'static;

    fn to_protocol(&self, msg: &DatapoolMessage) -> Vec<Self::Outbound>;
    fn to_datapool(&self, wire: &Self::Wire) -> Vec<DatapoolMessage>;
}

pub type BoundProtocol<O> = Arc<dyn Protocol<Outbound = O>>;

/// Outbound half of a handler, independent of the wire message type.
pub trait Handler: Plugin + Send + Sync {
    fn robot_name(&self) -> &str;
    fn send_to_robot(&self, msg: &DatapoolMessage) -> Result<usize, ProtocolError>;
}

pub struct MessageHandler<C: MessageConverter> {
    name: String,
    robot: String,
    converter: C,
    resolver: Arc<dyn DatapoolResolver>,
    datapool: OnceLock<Arc<dyn Datapool>>,
    resolving: Mutex<()>,
    protocol: RwLock<Option<BoundProtocol<C::Outbound>>>,
    metrics: Option<CommMetrics>,
}

impl<C: MessageConverter> MessageHandler<C> {
    pub fn new(robot: &str, converter: C, resolver: Arc<dyn DatapoolResolver>) -> Self {
        Self {
            name: format!("{robot}.handler"),
            robot: robot.to_string(),
            converter,
            resolver,
            datapool: OnceLock::new(),
            resolving: Mutex::new(()),
            protocol: RwLock::new(None),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: CommMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn robot_name(&self) -> &str {
        &self.robot
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    pub fn bind_protocol(&self, protocol: BoundProtocol<C::Outbound>) {
        *self.protocol.write().unwrap_or_else(|e| e.into_inner()) = Some(protocol);
    }

    pub fn unbind_protocol(&self) -> Option<BoundProtocol<C::Outbound>> {
        self.protocol
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn bound_protocol(&self) -> Option<BoundProtocol<C::Outbound>> {
        self.protocol
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Datapool for this robot, resolved on first use.
    ///
    /// Double-checked: the cached reference is read without locking; on a miss the
    /// resolver runs under `resolving`, after a second look at the cache. A failed
    /// resolution is not cached and is retried by the next caller.
    pub fn datapool(&self) -> Option<Arc<dyn Datapool>> {
        if let Some(pool) = self.datapool.get() {
            return Some(Arc::clone(pool));
        }
        let _guard = lock(&self.resolving);
        if let Some(pool) = self.datapool.get() {
            return Some(Arc::clone(pool));
        }
        let pool = self.resolver.resolve(&self.robot)?;
        tracing::debug!(robot = %self.robot, "datapool resolved");
        Some(Arc::clone(self.datapool.get_or_init(|| pool)))
    }

    /// Convert a datapool message and forward every result to the bound protocol.
    /// Returns how many messages were forwarded; nothing happens when no protocol is bound.
    pub fn send_to_robot(&self, msg: &DatapoolMessage) -> Result<usize, ProtocolError> {
        let Some(protocol) = self.bound_protocol() else {
            tracing::debug!(robot = %self.robot, key = %msg.key, "no protocol bound; dropping command");
            return Ok(0);
        };
        let outbound = self.converter.to_protocol(msg);
        for m in &outbound {
            protocol.send_to_robot(m)?;
        }
        Ok(outbound.len())
    }

    /// Convert a wire message and push every result into the robot's datapool.
    /// Returns how many messages were delivered.
    pub fn receive_to_datapool(&self, wire: &C::Wire) -> usize {
        let Some(pool) = self.datapool() else {
            tracing::debug!(robot = %self.robot, "datapool not available yet; dropping message");
            return 0;
        };
        let messages = self.converter.to_datapool(wire);
        let n = messages.len();
        for m in messages {
            pool.accept(m);
        }
        if let Some(metrics) = &self.metrics {
            metrics.datapool_writes.inc_by(n as u64);
        }
        n
    }
}

impl<C: MessageConverter> Plugin for MessageHandler<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::MessageHandler
    }

    fn visualization_type(&self) -> VisualizationType {
        VisualizationType::None
    }
}

impl<C: MessageConverter> Handler for MessageHandler<C> {
    fn robot_name(&self) -> &str {
        &self.robot
    }

    fn send_to_robot(&self, msg: &DatapoolMessage) -> Result<usize, ProtocolError> {
        MessageHandler::send_to_robot(self, msg)
    }
}

/// Default conversion for format-driven protocols.
///
/// Inbound frames fan out into one datapool message per entry. Outbound messages are
/// encoded with the command format registered for their key; unknown keys and values
/// that do not fit produce nothing.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConverter {
    commands: HashMap<String, FormatSpec>,
    order: ByteOrder,
}

impl TelemetryConverter {
    pub fn new(commands: impl IntoIterator<Item = (String, FormatSpec)>, order: ByteOrder) -> Self {
        Self {
            commands: commands.into_iter().collect(),
            order,
        }
    }

    pub fn from_config(config: &ProtocolConfig) -> Result<Self, FormatError> {
        Ok(Self::new(config.command_formats()?, config.byte_order()))
    }
}

impl MessageConverter for TelemetryConverter {
    type Wire = TelemetryFrame;
    type Outbound = Vec<u8>;

    fn to_protocol(&self, msg: &DatapoolMessage) -> Vec<Vec<u8>> {
        let Some(spec) = self.commands.get(&msg.key) else {
            tracing::debug!(key = %msg.key, "no command format for key");
            return Vec::new();
        };
        match spec.encode(msg.value.values(), self.order) {
            Ok(bytes) => vec![bytes],
            Err(e) => {
                tracing::warn!(key = %msg.key, format = %spec, error = %e, "cannot encode command");
                Vec::new()
            }
        }
    }

    fn to_datapool(&self, frame: &TelemetryFrame) -> Vec<DatapoolMessage> {
        frame
            .entries
            .iter()
            .map(|e| DatapoolMessage::new(e.key.clone(), e.value.clone()).stamped(frame.ts))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapool::MemoryDatapool;
    use crate::decode::{DecodedValue, FieldValue};
    use crate::protocol::{ProtocolState, TelemetryEntry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[derive(Default)]
    struct CountingProtocol {
        sends: AtomicUsize,
    }

    impl Plugin for CountingProtocol {
        fn name(&self) -> &str {
            "counting"
        }
        fn plugin_type(&self) -> PluginType {
            PluginType::Protocol
        }
    }

    impl Protocol for CountingProtocol {
        type Outbound = Vec<u8>;
        fn implementation_id(&self) -> &str {
            "counting"
        }
        fn robot_name(&self) -> &str {
            "arm1"
        }
        fn state(&self) -> ProtocolState {
            ProtocolState::Receiving
        }
        fn start_communication(&self) -> Result<bool, ProtocolError> {
            Ok(true)
        }
        fn stop_communication(&self) -> Result<(), ProtocolError> {
            Ok(())
        }
        fn send_to_robot(&self, _msg: &Vec<u8>) -> Result<(), ProtocolError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Emits `fan_out` copies of every message.
    struct Repeat {
        fan_out: usize,
    }

    impl MessageConverter for Repeat {
        type Wire = TelemetryFrame;
        type Outbound = Vec<u8>;
        fn to_protocol(&self, _msg: &DatapoolMessage) -> Vec<Vec<u8>> {
            vec![vec![0u8]; self.fan_out]
        }
        fn to_datapool(&self, _wire: &TelemetryFrame) -> Vec<DatapoolMessage> {
            Vec::new()
        }
    }

    fn no_datapool() -> Arc<dyn DatapoolResolver> {
        Arc::new(|_: &str| -> Option<Arc<dyn Datapool>> { None })
    }

    fn command(key: &str, v: FieldValue) -> DatapoolMessage {
        DatapoolMessage::new(key, DecodedValue::Scalar(v))
    }

    fn frame() -> TelemetryFrame {
        TelemetryFrame {
            robot: "arm1".into(),
            entries: vec![
                TelemetryEntry {
                    key: "a".into(),
                    value: DecodedValue::Scalar(FieldValue::Int(1)),
                },
                TelemetryEntry {
                    key: "b".into(),
                    value: DecodedValue::Scalar(FieldValue::Int(2)),
                },
            ],
            ts: None,
        }
    }

    #[test]
    fn test_zero_fan_out_makes_no_protocol_calls() {
        let h = MessageHandler::new("arm1", Repeat { fan_out: 0 }, no_datapool());
        let proto = Arc::new(CountingProtocol::default());
        h.bind_protocol(proto.clone());
        assert_eq!(h.send_to_robot(&command("x", FieldValue::Int(1))).unwrap(), 0);
        assert_eq!(proto.sends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fan_out_forwards_each_message() {
        let h = MessageHandler::new("arm1", Repeat { fan_out: 3 }, no_datapool());
        let proto = Arc::new(CountingProtocol::default());
        h.bind_protocol(proto.clone());
        assert_eq!(h.send_to_robot(&command("x", FieldValue::Int(1))).unwrap(), 3);
        assert_eq!(proto.sends.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_send_without_protocol_is_noop() {
        let h = MessageHandler::new("arm1", Repeat { fan_out: 2 }, no_datapool());
        assert_eq!(h.send_to_robot(&command("x", FieldValue::Int(1))).unwrap(), 0);
        let proto = Arc::new(CountingProtocol::default());
        h.bind_protocol(proto.clone());
        assert!(h.unbind_protocol().is_some());
        assert_eq!(h.send_to_robot(&command("x", FieldValue::Int(1))).unwrap(), 0);
        assert_eq!(proto.sends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_receive_fans_out_into_datapool() {
        let pool = Arc::new(MemoryDatapool::new());
        let target = Arc::clone(&pool);
        let resolver: Arc<dyn DatapoolResolver> =
            Arc::new(move |_: &str| -> Option<Arc<dyn Datapool>> { Some(target.clone()) });
        let h = MessageHandler::new("arm1", TelemetryConverter::default(), resolver);
        assert_eq!(h.receive_to_datapool(&frame()), 2);
        assert_eq!(pool.len(), 2);
        assert_eq!(
            pool.get("b").map(|m| m.value),
            Some(DecodedValue::Scalar(FieldValue::Int(2)))
        );
    }

    #[test]
    fn test_unresolved_datapool_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(MemoryDatapool::new());
        let (c, target) = (Arc::clone(&calls), Arc::clone(&pool));
        let resolver: Arc<dyn DatapoolResolver> =
            Arc::new(move |_: &str| -> Option<Arc<dyn Datapool>> {
                // Unavailable on the first attempt only.
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    None
                } else {
                    Some(target.clone())
                }
            });
        let h = MessageHandler::new("arm1", TelemetryConverter::default(), resolver);
        assert_eq!(h.receive_to_datapool(&frame()), 0);
        assert_eq!(h.receive_to_datapool(&frame()), 2);
        assert_eq!(h.receive_to_datapool(&frame()), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_concurrent_first_use_resolves_once() {
        const THREADS: usize = 16;
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let resolver: Arc<dyn DatapoolResolver> =
            Arc::new(move |_: &str| -> Option<Arc<dyn Datapool>> {
                c.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(10));
                Some(Arc::new(MemoryDatapool::new()))
            });
        let h = Arc::new(MessageHandler::new(
            "arm1",
            TelemetryConverter::default(),
            resolver,
        ));
        let barrier = Arc::new(Barrier::new(THREADS));
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let (h, barrier) = (Arc::clone(&h), Arc::clone(&barrier));
                std::thread::spawn(move || {
                    barrier.wait();
                    h.receive_to_datapool(&frame())
                })
            })
            .collect();
        for w in workers {
            assert_eq!(w.join().unwrap(), 2);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_telemetry_converter_encodes_known_keys() {
        let conv = TelemetryConverter::new(
            vec![("joint.target".to_string(), FormatSpec::parse("%s"))],
            ByteOrder::Big,
        );
        assert_eq!(
            conv.to_protocol(&command("joint.target", FieldValue::Int(258))),
            vec![vec![0x01, 0x02]]
        );
        assert!(conv
            .to_protocol(&command("unknown", FieldValue::Int(1)))
            .is_empty());
        assert!(conv
            .to_protocol(&command("joint.target", FieldValue::Long(1 << 40)))
            .is_empty());
    }

    #[test]
    fn test_classification_is_fixed() {
        let h = MessageHandler::new("arm1", TelemetryConverter::default(), no_datapool());
        assert_eq!(h.plugin_type(), PluginType::MessageHandler);
        assert_eq!(h.visualization_type(), VisualizationType::None);
        assert_eq!(h.name(), "arm1.handler");
    }
}
