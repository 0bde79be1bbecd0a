//! Client side of the tunnel protocol, free of any I/O.
//!
//! The caller moves bytes over HTTP; this module produces the credentials
//! and bodies to send and interprets what comes back.
//!
//! ```no_run
//! use htun_core::client::{HandshakeStart, TunnelClient};
//! use htun_core::crypto::Keypair;
//!
//! let keypair = Keypair::generate();
//! let start = HandshakeStart::new(&keypair).unwrap();
//! // GET {base}/auth with start.credentials().to_header() ...
//! # let response_body: Vec<u8> = Vec::new();
//! let client = TunnelClient::complete(start, &response_body).unwrap();
//! println!("leased {}", client.setting().ip);
//! ```

use bytes::Bytes;
use thiserror::Error;

use crate::auth::{encode_handshake_message, BasicCredentials, CodecError};
use crate::crypto::{CryptoError, Keypair, NoiseInitiator, PublicKey, SessionCipher};
use crate::framing::{decode_batch, encode_batch, FramingError};
use crate::setting::ClientSetting;

/// A handshake in flight: Noise message 1 already written.
pub struct HandshakeStart {
    initiator: NoiseInitiator,
    credentials: BasicCredentials,
    client_public: PublicKey,
}

impl HandshakeStart {
    pub fn new(keypair: &Keypair) -> Result<Self, ClientError> {
        let (initiator, msg1) = NoiseInitiator::new(keypair)?;
        let credentials = encode_handshake_message(&msg1)?;
        Ok(Self {
            initiator,
            credentials,
            client_public: keypair.public,
        })
    }

    /// Credentials for the handshake request.
    pub fn credentials(&self) -> &BasicCredentials {
        &self.credentials
    }
}

/// An established tunnel: lease, settings, and transport cipher.
#[derive(Debug)]
pub struct TunnelClient {
    setting: ClientSetting,
    cipher: SessionCipher,
    client_public: PublicKey,
}

impl TunnelClient {
    /// Finish the handshake with the body of a 200 handshake response.
    pub fn complete(start: HandshakeStart, response_body: &[u8]) -> Result<Self, ClientError> {
        let (payload, cipher) = start.initiator.finish(response_body)?;
        let setting = ClientSetting::decode(&payload)?;
        Ok(Self {
            setting,
            cipher,
            client_public: start.client_public,
        })
    }

    pub fn setting(&self) -> &ClientSetting {
        &self.setting
    }

    /// The server's static key, as authenticated by the handshake.
    pub fn server_public(&self) -> &PublicKey {
        self.cipher.remote_static()
    }

    pub fn session_id(&self) -> [u8; 32] {
        self.cipher.session_id
    }

    /// Credentials for data-path requests: the leased address identifies
    /// the session. The password carries the client key for operators
    /// reading access logs; the server does not rely on it.
    pub fn data_credentials(&self) -> BasicCredentials {
        BasicCredentials::new(self.setting.ip.to_string(), hex::encode(self.client_public))
    }

    /// Encrypt a batch of outbound packets into a request body.
    pub fn encode_batch<P: AsRef<[u8]>>(&mut self, packets: &[P]) -> Result<Bytes, ClientError> {
        Ok(encode_batch(packets, &mut self.cipher, self.setting.mtu as usize)?)
    }

    /// Decrypt a response body into the packets the server returned.
    pub fn decode_batch(&mut self, body: &[u8]) -> Result<Vec<Bytes>, ClientError> {
        Ok(decode_batch(body, &mut self.cipher, self.setting.mtu as usize)?)
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Framing(#[from] FramingError),
}
