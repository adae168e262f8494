//! Actor protocol frames.
//!
//! Every session starts with a `u32` protocol id, then a kind-specific
//! payload (all integers little-endian):
//!
//! | id | frame | payload |
//! |---|---|---|
//! | 0 | `ExistReq` | name — replies `u32` 0/1 |
//! | 1 | `Msg` | name, `u32` sender port, content |
//! | 2 | `Req` | name, `u32` sender port, `u64` uid, content |
//! | 3 | `ReqBig` | same as `Req` |
//! | 4 | `Resp` | `u64` uid, content |
//! | 5 | `RespBig` | `u64` uid, then the list wire format |
//! | 6 | `KillAll` | — |
//!
//! A name is a `u32` length (capped at [`MAX_NAME_LEN`]) plus bytes; content
//! is a `u8` presence flag followed by a serialized
//! [`ConfigNode`](crate::config::ConfigNode). The sender's address is
//! reconstructed from the connection's peer IP and the port carried in the
//! frame, so replies reach the sender's server socket rather than its
//! ephemeral client port.

use std::net::{Ipv4Addr, SocketAddrV4};

use super::ActorError;
use crate::config::{ConfigNode, wire};
use crate::net::TcpStream;

/// Hard cap on actor name length, applied on both send and receive.
pub const MAX_NAME_LEN: usize = 32;

/// Frame kinds of the actor protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    ExistReq = 0,
    Msg = 1,
    Req = 2,
    ReqBig = 3,
    Resp = 4,
    RespBig = 5,
    KillAll = 6,
}

impl TryFrom<u32> for Protocol {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        match value {
            0 => Ok(Protocol::ExistReq),
            1 => Ok(Protocol::Msg),
            2 => Ok(Protocol::Req),
            3 => Ok(Protocol::ReqBig),
            4 => Ok(Protocol::Resp),
            5 => Ok(Protocol::RespBig),
            6 => Ok(Protocol::KillAll),
            other => Err(other),
        }
    }
}

/// One frame of actor traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorMessage {
    pub kind: Protocol,
    pub uid: u64,
    pub target: String,
    pub sender_port: u16,
    pub content: Option<ConfigNode>,
}

impl ActorMessage {
    pub fn msg(target: String, sender_port: u16, content: ConfigNode) -> Self {
        Self {
            kind: Protocol::Msg,
            uid: 0,
            target,
            sender_port,
            content: Some(content),
        }
    }

    pub fn request(uid: u64, target: String, sender_port: u16, content: ConfigNode) -> Self {
        Self {
            kind: Protocol::Req,
            uid,
            target,
            sender_port,
            content: Some(content),
        }
    }

    pub fn request_big(uid: u64, target: String, sender_port: u16, content: ConfigNode) -> Self {
        Self {
            kind: Protocol::ReqBig,
            uid,
            target,
            sender_port,
            content: Some(content),
        }
    }

    pub fn response(uid: u64, content: ConfigNode) -> Self {
        Self {
            kind: Protocol::Resp,
            uid,
            target: String::new(),
            sender_port: 0,
            content: Some(content),
        }
    }

    /// Write the frame, protocol id included. `RespBig` writes only the id
    /// and uid; the caller streams the list payload behind it.
    pub fn write_to(&self, stream: &mut TcpStream) -> Result<(), ActorError> {
        stream.send_u32(self.kind as u32)?;
        match self.kind {
            Protocol::ExistReq => write_name(stream, &self.target),
            Protocol::Msg => {
                write_name(stream, &self.target)?;
                stream.send_u32(self.sender_port as u32)?;
                write_content(stream, self.content.as_ref())
            }
            Protocol::Req | Protocol::ReqBig => {
                write_name(stream, &self.target)?;
                stream.send_u32(self.sender_port as u32)?;
                stream.send_u64(self.uid)?;
                write_content(stream, self.content.as_ref())
            }
            Protocol::Resp => {
                stream.send_u64(self.uid)?;
                write_content(stream, self.content.as_ref())
            }
            Protocol::RespBig => {
                stream.send_u64(self.uid)?;
                Ok(())
            }
            Protocol::KillAll => Ok(()),
        }
    }

    /// Read one frame, protocol id included.
    pub fn read_from(stream: &mut TcpStream) -> Result<Self, ActorError> {
        let id = stream.recv_u32()?;
        let kind = Protocol::try_from(id)
            .map_err(|_| ActorError::Net(crate::net::NetError::Protocol("unknown frame id")))?;
        Self::read_body(stream, kind)
    }

    /// Read the payload of a frame whose protocol id was already consumed.
    pub fn read_body(stream: &mut TcpStream, kind: Protocol) -> Result<Self, ActorError> {
        let mut frame = Self {
            kind,
            uid: 0,
            target: String::new(),
            sender_port: 0,
            content: None,
        };
        match kind {
            Protocol::ExistReq => {
                frame.target = read_name(stream)?;
            }
            Protocol::Msg => {
                frame.target = read_name(stream)?;
                frame.sender_port = stream.recv_u32()? as u16;
                frame.content = read_content(stream)?;
            }
            Protocol::Req | Protocol::ReqBig => {
                frame.target = read_name(stream)?;
                frame.sender_port = stream.recv_u32()? as u16;
                frame.uid = stream.recv_u64()?;
                frame.content = read_content(stream)?;
            }
            Protocol::Resp => {
                frame.uid = stream.recv_u64()?;
                frame.content = read_content(stream)?;
            }
            Protocol::RespBig => {
                frame.uid = stream.recv_u64()?;
            }
            Protocol::KillAll => {}
        }
        Ok(frame)
    }

    /// The sender's server address, given the connection's peer IP.
    pub fn sender_addr(&self, peer_ip: Ipv4Addr) -> SocketAddrV4 {
        SocketAddrV4::new(peer_ip, self.sender_port)
    }
}

/// Write a length-prefixed actor name, enforcing [`MAX_NAME_LEN`].
pub fn write_name(stream: &mut TcpStream, name: &str) -> Result<(), ActorError> {
    if name.len() > MAX_NAME_LEN {
        return Err(ActorError::NameTooLong);
    }
    stream.send_u32(name.len() as u32)?;
    stream.send_str(name)?;
    Ok(())
}

/// Read a length-prefixed actor name, enforcing [`MAX_NAME_LEN`].
pub fn read_name(stream: &mut TcpStream) -> Result<String, ActorError> {
    let len = stream.recv_u32()? as usize;
    if len > MAX_NAME_LEN {
        return Err(ActorError::NameTooLong);
    }
    Ok(stream.recv_str(len)?)
}

fn write_content(stream: &mut TcpStream, content: Option<&ConfigNode>) -> Result<(), ActorError> {
    match content {
        Some(node) => {
            stream.send_u8(1)?;
            wire::write_node(stream, node)?;
            Ok(())
        }
        None => {
            stream.send_u8(0)?;
            Ok(())
        }
    }
}

fn read_content(stream: &mut TcpStream) -> Result<Option<ConfigNode>, ActorError> {
    if stream.recv_u8()? == 0 {
        return Ok(None);
    }
    Ok(Some(wire::read_node(stream)?))
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::thread;

    use super::*;
    use crate::net::TcpListener;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.addr();
        let handle = thread::spawn(move || listener.accept().unwrap());
        let client = TcpStream::connect(addr).unwrap();
        (client, handle.join().unwrap())
    }

    #[test]
    fn request_frame_round_trip() {
        let (mut client, mut server) = pair();

        let mut content = ConfigNode::dict();
        content.set("v", 42i64);
        let sent = ActorMessage::request(77, "worker".to_string(), 9000, content);
        sent.write_to(&mut client).unwrap();

        let received = ActorMessage::read_from(&mut server).unwrap();
        assert_eq!(received, sent);
        assert_eq!(
            received.sender_addr(Ipv4Addr::LOCALHOST),
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9000)
        );
    }

    #[test]
    fn message_and_response_round_trip() {
        let (mut client, mut server) = pair();

        let msg = ActorMessage::msg("sink".to_string(), 1234, ConfigNode::Int(5));
        msg.write_to(&mut client).unwrap();
        let resp = ActorMessage::response(9, ConfigNode::Bool(true));
        resp.write_to(&mut client).unwrap();

        assert_eq!(ActorMessage::read_from(&mut server).unwrap(), msg);
        assert_eq!(ActorMessage::read_from(&mut server).unwrap(), resp);
    }

    #[test]
    fn name_cap_is_enforced_both_ways() {
        let (mut client, mut server) = pair();

        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            write_name(&mut client, &long),
            Err(ActorError::NameTooLong)
        ));

        // A peer ignoring the cap is rejected on the read side.
        client.send_u32(Protocol::ExistReq as u32).unwrap();
        client.send_u32(64).unwrap();
        client.send_str(&"y".repeat(64)).unwrap();
        assert!(matches!(
            ActorMessage::read_from(&mut server),
            Err(ActorError::NameTooLong)
        ));
    }

    #[test]
    fn unknown_frame_id_is_rejected() {
        let (mut client, mut server) = pair();
        client.send_u32(99).unwrap();
        assert!(ActorMessage::read_from(&mut server).is_err());
    }
}
