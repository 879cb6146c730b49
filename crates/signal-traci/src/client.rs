//! Blocking TraCI client over one TCP connection.
//!
//! Every call writes one single-command message and reads the full
//! response before returning. The client is not shared: each engine
//! session owns exactly one.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};

use tracing::debug;

use crate::codec::{self, MESSAGE_HEADER_LEN, Reader, Writer};
use crate::constants::{
    CMD_CLOSE, CMD_GET_VERSION, CMD_SET_TL_VARIABLE, CMD_SIMULATION_STEP, RESPONSE_OFFSET,
    RTYPE_OK, TL_PHASE_INDEX, TYPE_INTEGER,
};
use crate::error::TraciError;

/// Connection to a running simulator.
#[derive(Debug)]
pub struct TraciClient {
    stream: TcpStream,
    label: String,
}

impl TraciClient {
    /// Wrap a connected stream.
    pub fn new(stream: TcpStream, label: &str) -> Result<Self, TraciError> {
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            label: label.to_owned(),
        })
    }

    /// Label used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    fn exchange(&mut self, id: u8, content: &[u8]) -> Result<Vec<u8>, TraciError> {
        let message = codec::frame_message(&[codec::encode_command(id, content)?])?;
        self.stream.write_all(&message)?;

        let mut header = [0u8; MESSAGE_HEADER_LEN];
        self.stream.read_exact(&mut header)?;
        let total = u32::from_be_bytes(header);
        let body_len = usize::try_from(total)
            .ok()
            .and_then(|len| len.checked_sub(MESSAGE_HEADER_LEN))
            .ok_or_else(|| TraciError::malformed(format!("message length {total}")))?;

        let mut body = vec![0u8; body_len];
        self.stream.read_exact(&mut body)?;
        Ok(body)
    }

    /// Send one command, check its status, and return the rest of the
    /// response.
    fn request(&mut self, id: u8, content: &[u8]) -> Result<Vec<u8>, TraciError> {
        let body = self.exchange(id, content)?;
        let mut reader = Reader::new(&body);
        let status = reader.status()?;
        if status.command != id {
            return Err(TraciError::malformed(format!(
                "status for command 0x{:02x}, expected 0x{id:02x}",
                status.command
            )));
        }
        if status.result != RTYPE_OK {
            return Err(TraciError::Status {
                command: id,
                description: status.description,
            });
        }
        Ok(reader.rest().to_vec())
    }

    /// Raw typed value of one variable.
    pub fn get_variable(
        &mut self,
        domain: u8,
        variable: u8,
        object: &str,
    ) -> Result<Vec<u8>, TraciError> {
        let mut content = Writer::new();
        content.put_u8(variable);
        content.put_string(object)?;
        let payload = self.request(domain, content.as_bytes())?;

        let expected = domain
            .checked_add(RESPONSE_OFFSET)
            .ok_or_else(|| TraciError::malformed(format!("no response id for 0x{domain:02x}")))?;
        let mut reader = Reader::new(&payload);
        let (_, response) = reader.command_header()?;
        if response != expected {
            return Err(TraciError::malformed(format!(
                "response 0x{response:02x}, expected 0x{expected:02x}"
            )));
        }
        let echoed = reader.u8()?;
        if echoed != variable {
            return Err(TraciError::malformed(format!(
                "variable 0x{echoed:02x}, expected 0x{variable:02x}"
            )));
        }
        reader.string()?;
        Ok(reader.rest().to_vec())
    }

    /// Integer variable.
    pub fn get_i32(&mut self, domain: u8, variable: u8, object: &str) -> Result<i32, TraciError> {
        let value = self.get_variable(domain, variable, object)?;
        Reader::new(&value).typed_i32()
    }

    /// Float variable.
    pub fn get_f64(&mut self, domain: u8, variable: u8, object: &str) -> Result<f64, TraciError> {
        let value = self.get_variable(domain, variable, object)?;
        Reader::new(&value).typed_f64()
    }

    /// String variable.
    pub fn get_string(
        &mut self,
        domain: u8,
        variable: u8,
        object: &str,
    ) -> Result<String, TraciError> {
        let value = self.get_variable(domain, variable, object)?;
        Reader::new(&value).typed_string()
    }

    /// String list variable.
    pub fn get_string_list(
        &mut self,
        domain: u8,
        variable: u8,
        object: &str,
    ) -> Result<Vec<String>, TraciError> {
        let value = self.get_variable(domain, variable, object)?;
        Reader::new(&value).typed_string_list()
    }

    /// Polygon variable.
    pub fn get_polygon(
        &mut self,
        domain: u8,
        variable: u8,
        object: &str,
    ) -> Result<Vec<(f64, f64)>, TraciError> {
        let value = self.get_variable(domain, variable, object)?;
        Reader::new(&value).typed_polygon()
    }

    /// Server API version and identification string.
    pub fn version(&mut self) -> Result<(i32, String), TraciError> {
        let payload = self.request(CMD_GET_VERSION, &[])?;
        let mut reader = Reader::new(&payload);
        reader.command_header()?;
        let api = reader.i32()?;
        let name = reader.string()?;
        Ok((api, name))
    }

    /// Advance the simulation by one step.
    pub fn simulation_step(&mut self) -> Result<(), TraciError> {
        let mut content = Writer::new();
        content.put_f64(0.0);
        self.request(CMD_SIMULATION_STEP, content.as_bytes())?;
        Ok(())
    }

    /// Set a traffic light's phase index.
    pub fn set_phase(&mut self, intersection: &str, index: i32) -> Result<(), TraciError> {
        let mut content = Writer::new();
        content.put_u8(TL_PHASE_INDEX);
        content.put_string(intersection)?;
        content.put_u8(TYPE_INTEGER);
        content.put_i32(index);
        self.request(CMD_SET_TL_VARIABLE, content.as_bytes())?;
        Ok(())
    }

    /// End the simulation and shut the socket down.
    pub fn close(&mut self) -> Result<(), TraciError> {
        self.request(CMD_CLOSE, &[])?;
        match self.stream.shutdown(Shutdown::Both) {
            Err(err) if err.kind() != ErrorKind::NotConnected => Err(err.into()),
            _ => {
                debug!(label = %self.label, "TraCI connection closed");
                Ok(())
            }
        }
    }
}
