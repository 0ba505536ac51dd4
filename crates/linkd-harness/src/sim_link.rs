//! Simulated peer on the far end of a datagram channel.

use std::{io, os::unix::net::UnixDatagram};

use linkd_daemon::DatagramChannel;
use linkd_proto::Frame;

/// Far end of a [`sim_link`].
#[derive(Debug)]
pub struct SimPeer {
    socket: UnixDatagram,
}

impl SimPeer {
    /// Send a frame to the session.
    pub fn send_frame(&self, frame: &Frame) -> io::Result<()> {
        self.socket.send(&frame.to_bytes()).map(drop)
    }

    /// Send raw bytes, for malformed input.
    pub fn send_raw(&self, bytes: &[u8]) -> io::Result<()> {
        self.socket.send(bytes).map(drop)
    }

    /// Signal a hangup: the channel reads an empty datagram as one.
    pub fn hang_up(&self) -> io::Result<()> {
        self.socket.send(&[]).map(drop)
    }

    /// Every frame the session has sent so far. Undecodable datagrams are
    /// skipped.
    pub fn received(&self) -> io::Result<Vec<Frame>> {
        let mut frames = Vec::new();
        let mut buf = vec![0u8; Frame::MAX_SIZE];
        loop {
            match self.socket.recv(&mut buf) {
                Ok(len) => {
                    if let Ok(frame) = Frame::decode(&buf[..len]) {
                        frames.push(frame);
                    }
                },
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(frames),
                Err(err) => return Err(err),
            }
        }
    }
}

/// A connected channel and its peer.
pub fn sim_link(name: &str) -> io::Result<(DatagramChannel, SimPeer)> {
    let (ours, theirs) = UnixDatagram::pair()?;
    theirs.set_nonblocking(true)?;
    let channel = DatagramChannel::from_socket(name, ours)?;
    Ok((channel, SimPeer { socket: theirs }))
}
