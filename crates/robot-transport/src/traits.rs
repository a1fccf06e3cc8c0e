use crate::{Result, TransportInfo};
use std::io::Read;

/// A minimal blocking link to a robot.
///
/// `Frame` is the already-encoded outbound payload and `Stream` the inbound byte stream
/// handed to a receive loop. The stream is owned separately from the transport so that
/// sends can proceed while another thread is blocked reading.
pub trait Transport: Send + 'static {
    type Frame;
    type Stream: Read + Send + 'static;

    /// Establish the link.
    fn connect(&mut self) -> Result<()>;

    /// Tear the link down. Open streams must report end-of-stream afterwards.
    fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Obtain the inbound stream of a connected link.
    fn stream(&mut self) -> Result<Self::Stream>;

    /// Send one encoded message.
    fn send(&mut self, frame: &Self::Frame) -> Result<()>;

    /// Describe this endpoint.
    fn info(&self) -> TransportInfo;
}
