use crate::connection::{
    Connection, ConnectionDescriptor, ConnectionError, ConnectionRegistry, FactoryContext,
};
use crate::datapool::DatapoolRegistry;
use crate::loader::ProfileRegistry;
use crate::metrics::MetricsHub;
use std::sync::Arc;

/// Everything the communication layer needs, built once at startup and passed by
/// reference to whoever opens connections.
pub struct CommContext {
    profiles: ProfileRegistry,
    connections: ConnectionRegistry,
    datapools: Arc<DatapoolRegistry>,
    metrics: MetricsHub,
}

impl CommContext {
    pub fn new(profiles: ProfileRegistry, connections: ConnectionRegistry) -> anyhow::Result<Self> {
        let metrics = MetricsHub::new().map_err(anyhow::Error::msg)?;
        Ok(Self {
            profiles,
            connections,
            datapools: Arc::new(DatapoolRegistry::new()),
            metrics,
        })
    }

    #[cfg(feature = "mock")]
    pub fn with_defaults(profiles: ProfileRegistry) -> anyhow::Result<Self> {
        Self::new(profiles, ConnectionRegistry::with_defaults())
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut ConnectionRegistry {
        &mut self.connections
    }

    pub fn datapools(&self) -> &Arc<DatapoolRegistry> {
        &self.datapools
    }

    pub fn metrics(&self) -> &MetricsHub {
        &self.metrics
    }

    /// One descriptor per protocol the robot's profile declares.
    pub fn descriptors_for(&self, robot: &str) -> Vec<ConnectionDescriptor> {
        self.profiles
            .lookup_robot(robot)
            .map(|p| {
                p.declared_communication_protocols()
                    .map(|c| ConnectionDescriptor::new(robot, &c.transport, &c.implementation))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Build the connection named by `desc`. The robot's datapool is registered so the
    /// handler can resolve it.
    pub fn connect(&self, desc: &ConnectionDescriptor) -> anyhow::Result<Connection> {
        let robot = self
            .profiles
            .lookup_robot(desc.robot_name())
            .ok_or_else(|| ConnectionError::UnknownRobot(desc.robot_name().to_string()))?;
        let config = robot
            .protocol_over(desc.protocol_kind(), desc.transport_kind())
            .ok_or_else(|| ConnectionError::NoProtocolConfig {
                robot: robot.name.clone(),
                protocol: desc.protocol_kind().to_string(),
                transport: desc.transport_kind().to_string(),
            })?;
        self.datapools.register(&robot.name);
        let ctx = FactoryContext {
            config,
            datapools: self.datapools.clone(),
            metrics: Some(self.metrics.comm.clone()),
        };
        self.connections.establish(desc, &ctx)
    }
}
