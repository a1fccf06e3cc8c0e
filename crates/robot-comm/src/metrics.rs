use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct CommMetrics {
    pub frames_rx: IntCounter,
    pub messages_tx: IntCounter,
    pub decode_errors: IntCounter,
    pub datapool_writes: IntCounter,
    pub active_connections: IntGauge,
}

impl CommMetrics {
    /// Unregistered counters, for components built outside a [`MetricsHub`].
    pub fn detached() -> Result<Self, String> {
        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        Ok(Self {
            frames_rx: counter("rc_frames_rx", "Telemetry frames decoded")?,
            messages_tx: counter("rc_messages_tx", "Encoded messages sent to robots")?,
            decode_errors: counter("rc_decode_errors", "Receive loops ended by decode errors")?,
            datapool_writes: counter("rc_datapool_writes", "Messages written to datapools")?,
            active_connections: IntGauge::new(
                "rc_active_connections",
                "Protocols currently receiving",
            )
            .map_err(|e| format!("metrics init error: {e}"))?,
        })
    }
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub comm: CommMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let comm = CommMetrics::detached()?;
        let _ = registry.register(Box::new(comm.frames_rx.clone()));
        let _ = registry.register(Box::new(comm.messages_tx.clone()));
        let _ = registry.register(Box::new(comm.decode_errors.clone()));
        let _ = registry.register(Box::new(comm.datapool_writes.clone()));
        let _ = registry.register(Box::new(comm.active_connections.clone()));
        Ok(Self { registry, comm })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_text_lists_counters() {
        let hub = MetricsHub::new().unwrap();
        hub.comm.frames_rx.inc();
        let text = hub.encode_text();
        assert!(text.contains("rc_frames_rx 1"));
        assert!(text.contains("rc_active_connections 0"));
    }
}
