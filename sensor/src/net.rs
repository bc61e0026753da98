use std::{
    io::{self, ErrorKind, Read, Write},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
};

use indoor_common::{Connection, Listener};

/// Upper bound on reads per liveness probe so a chatty client cannot stall a tick.
const MAX_DRAIN_READS: usize = 16;

pub struct NodeListener {
    listener: TcpListener,
}

impl NodeListener {
    pub fn bind(port: u16) -> io::Result<Self> {
        Self::bind_to((Ipv4Addr::UNSPECIFIED, port))
    }

    pub fn bind_to(address: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Listener for NodeListener {
    type Connection = ClientConnection;

    fn accept(&mut self) -> io::Result<Option<ClientConnection>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                Ok(Some(ClientConnection { stream, peer }))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }
}

pub struct ClientConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection for ClientConnection {
    fn is_connected(&mut self) -> bool {
        if self.stream.set_nonblocking(true).is_err() {
            return false;
        }

        // Clients never send anything meaningful; read to notice EOF and drop the rest.
        let mut scratch = [0_u8; 128];
        let mut alive = true;
        for _ in 0..MAX_DRAIN_READS {
            match self.stream.read(&mut scratch) {
                Ok(0) => {
                    alive = false;
                    break;
                }
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    alive = false;
                    break;
                }
            }
        }

        alive && self.stream.set_nonblocking(false).is_ok()
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()
    }

    fn peer(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}
