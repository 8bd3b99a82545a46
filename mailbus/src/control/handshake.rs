//! Handshake helpers for broker sessions (Hello/Welcome).
//!
//! Both frames are postcard bodies inside the ordinary length-prefixed
//! framing, so a broker reads the hello with the same frame reader it uses
//! for mail.

use std::io::{Read, Write};

use crate::control::types::{BrokerReply, ClientHello, ConnectError};
use crate::data::packet::FrameError;
use crate::net::link::{LinkError, read_frame, write_frame};

/// Client side: send the hello and wait for the broker's verdict.
///
/// The caller bounds the wait with the stream's read timeout.
///
/// # Errors
///
/// [`ConnectError::Rejected`] if the broker refused us,
/// [`ConnectError::ProtocolViolation`] if the reply was not a reply, and
/// [`ConnectError::Timeout`] if nothing came back in time.
pub fn client_handshake<S: Read + Write>(
    stream: &mut S,
    hello: &ClientHello,
    max_len: usize,
) -> Result<(), ConnectError> {
    let body = postcard::to_allocvec(hello).map_err(FrameError::from)?;
    write_frame(stream, &body, max_len)?;

    let reply = match read_frame(stream, max_len) {
        Ok(reply) => reply,
        Err(LinkError::Idle) => return Err(ConnectError::Timeout),
        Err(LinkError::FrameTooLarge { .. }) => return Err(ConnectError::ProtocolViolation),
        Err(e) => return Err(e.into()),
    };

    match postcard::from_bytes(&reply) {
        Ok(BrokerReply::Welcome) => Ok(()),
        Ok(BrokerReply::Rejected { reason }) => Err(ConnectError::Rejected(reason)),
        Err(_) => Err(ConnectError::ProtocolViolation),
    }
}

/// Broker side: read and validate a client's hello.
///
/// # Errors
///
/// [`ConnectError::ProtocolViolation`] if the first frame is not a hello.
pub fn broker_read_hello<S: Read>(
    stream: &mut S,
    max_len: usize,
) -> Result<ClientHello, ConnectError> {
    let body = match read_frame(stream, max_len) {
        Ok(body) => body,
        Err(LinkError::Idle) => return Err(ConnectError::Timeout),
        Err(e) => return Err(e.into()),
    };
    postcard::from_bytes(&body).map_err(|_| ConnectError::ProtocolViolation)
}

/// Broker side: answer a hello.
///
/// # Errors
///
/// Returns an error if the reply cannot be written.
pub fn broker_reply<S: Write>(
    stream: &mut S,
    reply: &BrokerReply,
    max_len: usize,
) -> Result<(), ConnectError> {
    let body = postcard::to_allocvec(reply).map_err(FrameError::from)?;
    write_frame(stream, &body, max_len)?;
    Ok(())
}
