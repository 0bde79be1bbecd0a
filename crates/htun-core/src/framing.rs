//! Packet framing — batches of IP packets as encrypted HTTP bodies.
//!
//! Plaintext stream, one record per packet:
//!   [u16 BE length] [packet bytes]
//!
//! Body on the wire, one frame per Noise transport message:
//!   [u16 BE ciphertext length] [ciphertext (chunk + 16-byte tag)]
//!
//! The plaintext stream is cut into chunks that each fit a Noise message.
//! An empty batch still yields one frame sealing zero bytes, so every body
//! is authenticated. Nonces are implicit: frame i of a body uses the
//! direction's counter plus i.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::crypto::{CryptoError, SessionCipher, MAX_NOISE_MESSAGE, TAG_LEN};

/// Length prefix of a packet record.
pub const RECORD_HEADER_LEN: usize = 2;

/// Length prefix of an encrypted frame.
pub const FRAME_HEADER_LEN: usize = 2;

/// Largest plaintext chunk sealed into one frame.
pub const MAX_CHUNK_PLAINTEXT: usize = MAX_NOISE_MESSAGE - TAG_LEN;

/// Serialize and encrypt a batch of packets with the cipher's send direction.
///
/// Every packet is checked against `mtu` before anything is encrypted, so an
/// oversize packet leaves the send counter untouched. The counter is only
/// committed once the whole body is sealed.
pub fn encode_batch<P: AsRef<[u8]>>(
    packets: &[P],
    cipher: &mut SessionCipher,
    mtu: usize,
) -> Result<Bytes, FramingError> {
    let limit = mtu.min(u16::MAX as usize);
    let total: usize = packets.iter().map(|p| p.as_ref().len() + RECORD_HEADER_LEN).sum();

    let mut plain = BytesMut::with_capacity(total);
    for packet in packets {
        let packet = packet.as_ref();
        if packet.len() > limit {
            return Err(FramingError::Oversize {
                len: packet.len(),
                mtu,
            });
        }
        plain.put_u16(packet.len() as u16);
        plain.put_slice(packet);
    }

    let frames = total.div_ceil(MAX_CHUNK_PLAINTEXT).max(1);
    let mut body = BytesMut::with_capacity(total + frames * (FRAME_HEADER_LEN + TAG_LEN));
    let mut counter = cipher.send_counter();
    let mut sealed = Vec::new();

    let mut seal_chunk = |chunk: &[u8], body: &mut BytesMut| -> Result<(), FramingError> {
        counter = cipher.seal_at(counter, chunk, &mut sealed)?;
        body.put_u16(sealed.len() as u16);
        body.put_slice(&sealed);
        Ok(())
    };

    if plain.is_empty() {
        seal_chunk(&[], &mut body)?;
    } else {
        for chunk in plain.chunks(MAX_CHUNK_PLAINTEXT) {
            seal_chunk(chunk, &mut body)?;
        }
    }

    cipher.commit_send(counter);
    Ok(body.freeze())
}

/// Decrypt and deserialize a batch with the cipher's receive direction.
///
/// Every frame is authenticated before any record boundary is read. On any
/// error the whole batch is rejected and the receive counter is left where
/// it was.
pub fn decode_batch(
    body: &[u8],
    cipher: &mut SessionCipher,
    mtu: usize,
) -> Result<Vec<Bytes>, FramingError> {
    if body.is_empty() {
        return Err(FramingError::EmptyBody);
    }

    let mut buf = body;
    let mut counter = cipher.recv_counter();
    let mut plain = BytesMut::with_capacity(body.len());
    let mut opened = Vec::new();

    while buf.has_remaining() {
        if buf.remaining() < FRAME_HEADER_LEN {
            return Err(FramingError::Truncated);
        }
        let len = buf.get_u16() as usize;
        if len < TAG_LEN || buf.remaining() < len {
            return Err(FramingError::Truncated);
        }
        counter = cipher.open_at(counter, &buf[..len], &mut opened)?;
        plain.put_slice(&opened);
        buf.advance(len);
    }

    let packets = split_records(plain.freeze(), mtu)?;
    cipher.commit_recv(counter);
    Ok(packets)
}

/// Split an authenticated plaintext stream into packet records.
fn split_records(mut plain: Bytes, mtu: usize) -> Result<Vec<Bytes>, FramingError> {
    let mut packets = Vec::new();
    while plain.has_remaining() {
        if plain.remaining() < RECORD_HEADER_LEN {
            return Err(FramingError::Truncated);
        }
        let len = plain.get_u16() as usize;
        if len > mtu {
            return Err(FramingError::Oversize { len, mtu });
        }
        if plain.remaining() < len {
            return Err(FramingError::Truncated);
        }
        packets.push(plain.split_to(len));
    }
    Ok(packets)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("packet of {len} bytes exceeds MTU {mtu}")]
    Oversize { len: usize, mtu: usize },

    #[error("batch body is empty")]
    EmptyBody,

    #[error("batch body truncated mid-frame or mid-record")]
    Truncated,

    #[error("batch authentication failed: {0}")]
    Crypto(#[from] CryptoError),
}
