//! robot-comm: format-driven device communication for robots
//!
//! Telemetry layouts are given as compact format strings in YAML robot profiles. A
//! protocol decodes the transport's byte stream with them, and a handler moves decoded
//! frames into the robot's datapool and datapool commands back out to the robot.

use std::sync::{Mutex, MutexGuard};

mod cursor;
pub use cursor::{ByteCursor, ByteOrder, CursorError};

mod format;
pub use format::{
    FieldType, FormatError, FormatField, FormatSpec, ParseInfo, ParseMode, MAX_FIELD_LENGTH,
};

mod decode;
pub use decode::{DecodedValue, FieldValue};

mod encode;

mod types;
pub use types::*;

mod loader;
pub use loader::{load_profile_file, load_profiles_dir, parse_profile, ProfileRegistry};

mod plugin;
pub use plugin::{Plugin, PluginType, VisualizationType};

mod metrics;
pub use metrics::{CommMetrics, MetricsHub};

mod datapool;
pub use datapool::{Datapool, DatapoolMessage, DatapoolRegistry, DatapoolResolver, MemoryDatapool};

mod protocol;
pub use protocol::{
    FormatProtocol, FrameReceiver, FrameSink, LoopExit, Protocol, ProtocolError, ProtocolState,
    TelemetryEntry, TelemetryFrame,
};

mod handler;
pub use handler::{BoundProtocol, Handler, MessageConverter, MessageHandler, TelemetryConverter};

mod connection;
pub use connection::{
    format_connection, ByteProtocol, Connection, ConnectionDescriptor, ConnectionError,
    ConnectionFactory, ConnectionRegistry, FactoryContext,
};

mod context;
pub use context::CommContext;

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Shared state stays consistent across a panicking holder; keep going.
    m.lock().unwrap_or_else(|e| e.into_inner())
}
