//! OSC output sink. One bundle per scheduler tick, one float message
//! per channel address, fire-and-forget over UDP.

use anyhow::{Context, Result};
use api::OutputSink;
use log::info;
use rosc::{encoder, OscBundle, OscMessage, OscPacket, OscType};
use std::net::UdpSocket;

pub struct OscSink {
    socket: UdpSocket,
    target_addr: String,
}

impl OscSink {
    pub fn new(address: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("Failed to bind OSC socket")?;
        let target_addr = format!("{}:{}", address, port);
        info!("OSC sink targeting {}", target_addr);
        Ok(Self {
            socket,
            target_addr,
        })
    }
}

impl OutputSink for OscSink {
    fn emit(&self, values: &[f32], addresses: &[&str]) -> Result<()> {
        debug_assert_eq!(values.len(), addresses.len());

        let messages: Vec<OscPacket> = addresses
            .iter()
            .zip(values)
            .map(|(addr, value)| {
                OscPacket::Message(OscMessage {
                    addr: addr.to_string(),
                    args: vec![OscType::Float(*value)],
                })
            })
            .collect();

        let bundle = OscBundle {
            timetag: rosc::OscTime::from((0, 0)),
            content: messages,
        };
        let buf = encoder::encode(&OscPacket::Bundle(bundle))?;
        self.socket.send_to(&buf, &self.target_addr)?;
        Ok(())
    }
}
