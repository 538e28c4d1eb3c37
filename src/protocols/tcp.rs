//! A reliable, ordered byte stream between two endpoints.
//!
//! Each connection is one [`TcpProcess`] running in kernelmode. The process
//! moves bytes between a [`Socket`](super::sockets::Socket) and the network,
//! segmenting outgoing data into at most one maximum segment size per
//! [`TcpSegment`]. Segments are kept in a [`SendingWindow`] until they are
//! acknowledged, and retransmitted when they sit unacknowledged for longer
//! than the retransmission timeout. The receiver reports out-of-order data with
//! selective acknowledgement edges so the sender can skip what already arrived.
//!
//! Both ends start their sequence space at zero. Windows are measured in
//! segments rather than bytes.

mod segment;
pub use segment::{Control, SackEdge, TcpSegment};

mod seq;

mod state;
pub use state::State;

mod window;
pub use window::{Outbound, Receipt, ReceivingWindow, SendingWindow};

mod tcp_process;
pub use tcp_process::{TcpConfig, TcpProcess};

#[cfg(test)]
mod tests;
