//! ClientSetting — the network configuration handed to a client when its
//! handshake succeeds.
//!
//! Carried as the encrypted payload of Noise message 2, encoded as a
//! compact JSON object:
//!
//!   {"ip":"192.168.4.2","subnet":"192.168.4.0/24","mtu":1400,"dns_port":53}

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::auth::CodecError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSetting {
    /// Address leased to this client inside the tunnel subnet.
    pub ip: Ipv4Addr,
    /// The tunnel subnet, in network form.
    pub subnet: Ipv4Net,
    /// Largest IP packet either side may put in a batch.
    pub mtu: u16,
    /// Port of the DNS resolver reachable through the tunnel.
    pub dns_port: u16,
}

impl ClientSetting {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let setting: ClientSetting = serde_json::from_slice(bytes)?;
        if !setting.subnet.contains(&setting.ip) {
            return Err(CodecError::AddressOutsideSubnet(setting.ip));
        }
        Ok(setting)
    }
}
