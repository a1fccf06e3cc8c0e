use crate::{Result, Timestamp, Transport, TransportError, TransportInfo};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

#[derive(Default)]
struct LinkState {
    inbound: VecDeque<u8>,
    connected: bool,
    hung_up: bool,
    connects: usize,
    sent: Vec<(Timestamp, Vec<u8>)>,
}

#[derive(Default)]
struct Link {
    state: Mutex<LinkState>,
    ready: Condvar,
}

impl Link {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        // A poisoned link only means a test thread panicked mid-push; the bytes are still valid.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A simple in-process transport. Bytes pushed through the paired [`MockRemote`] show up
/// on the inbound stream; sent frames are recorded for inspection.
pub struct MockTransport {
    name: String,
    refuse: bool,
    link: Arc<Link>,
}

impl MockTransport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            refuse: false,
            link: Arc::new(Link::default()),
        }
    }

    /// A transport whose `connect` always fails.
    pub fn refusing(name: &str) -> Self {
        Self {
            refuse: true,
            ..Self::new(name)
        }
    }

    /// Handle for the robot side of the link.
    pub fn remote(&self) -> MockRemote {
        MockRemote {
            link: Arc::clone(&self.link),
        }
    }
}

impl Transport for MockTransport {
    type Frame = Vec<u8>;
    type Stream = MockStream;

    fn connect(&mut self) -> Result<()> {
        if self.refuse {
            return Err(TransportError::Io(format!("{}: connection refused", self.name)));
        }
        let mut st = self.link.lock();
        st.connected = true;
        st.connects += 1;
        tracing::debug!(endpoint = %self.name, "mock link connected");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        let mut st = self.link.lock();
        st.connected = false;
        self.link.ready.notify_all();
        tracing::debug!(endpoint = %self.name, "mock link disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.lock().connected
    }

    fn stream(&mut self) -> Result<MockStream> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        Ok(MockStream {
            link: Arc::clone(&self.link),
        })
    }

    fn send(&mut self, frame: &Vec<u8>) -> Result<()> {
        let mut st = self.link.lock();
        if !st.connected {
            return Err(TransportError::NotConnected);
        }
        st.sent.push((Timestamp::now(), frame.clone()));
        Ok(())
    }

    fn info(&self) -> TransportInfo {
        TransportInfo {
            name: self.name.clone(),
            driver: "mock".to_string(),
        }
    }
}

/// Inbound side of a [`MockTransport`]. Blocks until bytes arrive and reports
/// end-of-stream once the link is disconnected or the remote hung up and drained.
pub struct MockStream {
    link: Arc<Link>,
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut st = self.link.lock();
        loop {
            if !st.connected {
                return Ok(0);
            }
            if !st.inbound.is_empty() {
                let n = buf.len().min(st.inbound.len());
                for (slot, b) in buf.iter_mut().zip(st.inbound.drain(..n)) {
                    *slot = b;
                }
                return Ok(n);
            }
            if st.hung_up {
                return Ok(0);
            }
            st = self
                .link
                .ready
                .wait(st)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// The robot end of a mock link.
#[derive(Clone)]
pub struct MockRemote {
    link: Arc<Link>,
}

impl MockRemote {
    /// Queue bytes for the inbound stream.
    pub fn push(&self, bytes: &[u8]) {
        let mut st = self.link.lock();
        st.inbound.extend(bytes.iter().copied());
        self.link.ready.notify_all();
    }

    /// Close the robot side; readers see end-of-stream after the queue drains.
    pub fn hang_up(&self) {
        let mut st = self.link.lock();
        st.hung_up = true;
        self.link.ready.notify_all();
    }

    /// Frames received from the local side, in send order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.link.lock().sent.iter().map(|(_, f)| f.clone()).collect()
    }

    /// Whether the local side currently holds the link open.
    pub fn is_connected(&self) -> bool {
        self.link.lock().connected
    }

    pub fn connect_count(&self) -> usize {
        self.link.lock().connects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_requires_connection() {
        let mut t = MockTransport::new("mock0");
        assert!(matches!(
            t.send(&vec![1, 2]),
            Err(TransportError::NotConnected)
        ));
        t.connect().unwrap();
        t.send(&vec![1, 2]).unwrap();
        assert_eq!(t.remote().sent(), vec![vec![1, 2]]);
    }

    #[test]
    fn test_stream_drains_then_eof_after_hang_up() {
        let mut t = MockTransport::new("mock0");
        let remote = t.remote();
        t.connect().unwrap();
        let mut s = t.stream().unwrap();
        remote.push(&[1, 2, 3]);
        remote.hang_up();
        let mut buf = Vec::new();
        s.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![1, 2, 3]);
    }

    #[test]
    fn test_disconnect_unblocks_reader() {
        let mut t = MockTransport::new("mock0");
        t.connect().unwrap();
        let mut s = t.stream().unwrap();
        let reader = std::thread::spawn(move || {
            let mut b = [0u8; 4];
            s.read(&mut b).unwrap()
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        t.disconnect().unwrap();
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn test_refusing_transport() {
        let mut t = MockTransport::refusing("mock0");
        assert!(t.connect().is_err());
        assert_eq!(t.remote().connect_count(), 0);
    }
}
