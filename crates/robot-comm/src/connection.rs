use crate::datapool::{DatapoolMessage, DatapoolResolver};
use crate::handler::{Handler, MessageHandler, TelemetryConverter};
use crate::metrics::CommMetrics;
use crate::protocol::{
    FormatProtocol, FrameSink, Protocol, ProtocolError, ProtocolState, TelemetryFrame,
};
use crate::types::ProtocolConfig;
use robot_transport::Transport;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("unknown robot: {0}")]
    UnknownRobot(String),
    #[error("robot {robot} declares no protocol {protocol} over {transport}")]
    NoProtocolConfig {
        robot: String,
        protocol: String,
        transport: String,
    },
    #[error("no factory registered for transport {transport:?} with protocol {protocol:?}")]
    UnknownKind { transport: String, protocol: String },
}

/// Names a robot link: which robot, over which transport kind, speaking which protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    robot_name: String,
    transport_kind: String,
    protocol_kind: String,
}

impl ConnectionDescriptor {
    pub fn new(robot_name: &str, transport_kind: &str, protocol_kind: &str) -> Self {
        Self {
            robot_name: robot_name.to_string(),
            transport_kind: transport_kind.to_string(),
            protocol_kind: protocol_kind.to_string(),
        }
    }

    pub fn robot_name(&self) -> &str {
        &self.robot_name
    }

    pub fn transport_kind(&self) -> &str {
        &self.transport_kind
    }

    pub fn protocol_kind(&self) -> &str {
        &self.protocol_kind
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}/{})",
            self.robot_name, self.transport_kind, self.protocol_kind
        )
    }
}

pub type ByteProtocol = dyn Protocol<Outbound = Vec<u8>>;

/// An established protocol + handler pair for one robot.
pub struct Connection {
    descriptor: ConnectionDescriptor,
    protocol: Arc<ByteProtocol>,
    handler: Arc<dyn Handler>,
}

impl Connection {
    pub fn new(
        descriptor: ConnectionDescriptor,
        protocol: Arc<ByteProtocol>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            descriptor,
            protocol,
            handler,
        }
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn protocol(&self) -> &Arc<ByteProtocol> {
        &self.protocol
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn state(&self) -> ProtocolState {
        self.protocol.state()
    }

    pub fn start(&self) -> Result<bool, ProtocolError> {
        self.protocol.start_communication()
    }

    pub fn stop(&self) -> Result<(), ProtocolError> {
        self.protocol.stop_communication()
    }

    /// Route a datapool command through the handler to the robot.
    pub fn send(&self, msg: &DatapoolMessage) -> Result<usize, ProtocolError> {
        self.handler.send_to_robot(msg)
    }
}

/// What a factory gets to build a connection with.
pub struct FactoryContext<'a> {
    pub config: &'a ProtocolConfig,
    pub datapools: Arc<dyn DatapoolResolver>,
    pub metrics: Option<CommMetrics>,
}

pub type ConnectionFactory =
    Box<dyn Fn(&ConnectionDescriptor, &FactoryContext<'_>) -> anyhow::Result<Connection> + Send + Sync>;

/// Factories keyed by `(transport_kind, protocol_kind)`, registered at configuration load.
#[derive(Default)]
pub struct ConnectionRegistry {
    factories: HashMap<(String, String), ConnectionFactory>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the in-process `mock` transport speaking the `format` protocol.
    #[cfg(feature = "mock")]
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register("mock", "format", |desc, ctx| {
            let endpoint = ctx.config.endpoint.as_deref().unwrap_or(desc.robot_name());
            format_connection(desc, ctx, robot_transport::MockTransport::new(endpoint))
        });
        reg
    }

    pub fn register<F>(&mut self, transport_kind: &str, protocol_kind: &str, factory: F)
    where
        F: Fn(&ConnectionDescriptor, &FactoryContext<'_>) -> anyhow::Result<Connection>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(
            (transport_kind.to_string(), protocol_kind.to_string()),
            Box::new(factory),
        );
    }

    pub fn contains(&self, transport_kind: &str, protocol_kind: &str) -> bool {
        self.factories
            .contains_key(&(transport_kind.to_string(), protocol_kind.to_string()))
    }

    /// Registered `(transport_kind, protocol_kind)` pairs, sorted.
    pub fn kinds(&self) -> Vec<(String, String)> {
        let mut out: Vec<_> = self.factories.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn establish(
        &self,
        desc: &ConnectionDescriptor,
        ctx: &FactoryContext<'_>,
    ) -> anyhow::Result<Connection> {
        let key = (
            desc.transport_kind().to_string(),
            desc.protocol_kind().to_string(),
        );
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| ConnectionError::UnknownKind {
                transport: key.0.clone(),
                protocol: key.1.clone(),
            })?;
        let conn = factory(desc, ctx)?;
        tracing::info!(connection = %desc, "connection established");
        Ok(conn)
    }
}

/// Wire a format-driven protocol and a telemetry handler over `transport`.
///
/// The handler holds the protocol; the protocol's frame sink only holds a weak reference
/// back to the handler.
pub fn format_connection<T>(
    desc: &ConnectionDescriptor,
    ctx: &FactoryContext<'_>,
    transport: T,
) -> anyhow::Result<Connection>
where
    T: Transport<Frame = Vec<u8>> + 'static,
{
    let robot = desc.robot_name();
    let mut handler = MessageHandler::new(
        robot,
        TelemetryConverter::from_config(ctx.config)?,
        Arc::clone(&ctx.datapools),
    );
    if let Some(m) = &ctx.metrics {
        handler = handler.with_metrics(m.clone());
    }
    let handler = Arc::new(handler);

    let weak = Arc::downgrade(&handler);
    let sink: FrameSink = Arc::new(move |frame: TelemetryFrame| {
        if let Some(h) = weak.upgrade() {
            h.receive_to_datapool(&frame);
        }
    });
    let mut protocol = FormatProtocol::from_config(robot, ctx.config, sink)?;
    if let Some(m) = &ctx.metrics {
        protocol = protocol.with_metrics(m.clone());
    }
    protocol.set_transport(transport)?;

    let protocol: Arc<ByteProtocol> = Arc::new(protocol);
    handler.bind_protocol(Arc::clone(&protocol));
    Ok(Connection::new(desc.clone(), protocol, handler))
}
