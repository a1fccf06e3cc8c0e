use crate::cursor::ByteOrder;
use crate::format::{FormatError, FormatSpec, ParseInfo, ParseMode};
use serde::{Deserialize, Serialize};

/// A robot as declared in its YAML profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct RobotProfile {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub protocols: Vec<ProtocolConfig>,
}

impl RobotProfile {
    /// Communication protocols in declaration order.
    pub fn declared_communication_protocols(&self) -> impl Iterator<Item = &ProtocolConfig> {
        self.protocols.iter()
    }

    pub fn protocol(&self, implementation: &str) -> Option<&ProtocolConfig> {
        self.declared_communication_protocols()
            .find(|p| p.implementation == implementation)
    }

    /// The entry declaring `implementation` over `transport`.
    pub fn protocol_over(&self, implementation: &str, transport: &str) -> Option<&ProtocolConfig> {
        self.declared_communication_protocols()
            .find(|p| p.implementation == implementation && p.transport == transport)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct ProtocolConfig {
    /// Protocol implementation identity, e.g. `format`.
    pub implementation: String,
    /// Transport kind, e.g. `mock`.
    pub transport: String,
    /// Endpoint handed to the transport factory.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub byte_order: WireOrder,
    #[serde(default)]
    pub strict_formats: bool,
    #[serde(default)]
    pub receive: Vec<DataPoint>,
    #[serde(default)]
    pub commands: Vec<DataPoint>,
}

impl ProtocolConfig {
    pub fn parse_mode(&self) -> ParseMode {
        if self.strict_formats {
            ParseMode::Strict
        } else {
            ParseMode::Lenient
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order.into()
    }

    /// Receive data points in frame order.
    pub fn parse_infos(&self) -> Result<Vec<ParseInfo>, FormatError> {
        let mode = self.parse_mode();
        self.receive
            .iter()
            .map(|dp| Ok(ParseInfo::new(&dp.key, FormatSpec::parse_with(&dp.format, mode)?)))
            .collect()
    }

    /// Outbound formats keyed by datapool key.
    pub fn command_formats(&self) -> Result<Vec<(String, FormatSpec)>, FormatError> {
        let mode = self.parse_mode();
        self.commands
            .iter()
            .map(|dp| Ok((dp.key.clone(), FormatSpec::parse_with(&dp.format, mode)?)))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct DataPoint {
    pub key: String,
    pub format: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum WireOrder {
    #[default]
    Big,
    Little,
}

impl From<WireOrder> for ByteOrder {
    fn from(o: WireOrder) -> Self {
        match o {
            WireOrder::Big => ByteOrder::Big,
            WireOrder::Little => ByteOrder::Little,
        }
    }
}
