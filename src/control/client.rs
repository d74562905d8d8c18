use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use serde::de::DeserializeOwned;

use super::{protocol_error, ControlInfo, Method, Request, Response};
use crate::common::Contact;
use crate::error::ErrorKind;
use crate::{Error, Result};

#[derive(Debug)]
/// Blocking client for a node's control plane.
pub struct ControlClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    next_id: u64,
}

impl ControlClient {
    pub fn connect(path: &Path) -> Result<Self> {
        let writer = UnixStream::connect(path)?;
        let reader = BufReader::new(writer.try_clone()?);

        Ok(ControlClient {
            reader,
            writer,
            next_id: 1,
        })
    }

    pub fn get_info(&mut self) -> Result<ControlInfo> {
        self.call(Method::GetInfo)
    }

    pub fn get_peers(&mut self, key: &str, limit: usize) -> Result<Vec<Contact>> {
        self.call(Method::GetPeers {
            key: key.to_string(),
            limit,
        })
    }

    pub fn get_item(&mut self, key: &str) -> Result<String> {
        self.call(Method::GetItem {
            key: key.to_string(),
        })
    }

    pub fn put_item(&mut self, key: &str, value: &str) -> Result<()> {
        let _: bool = self.call(Method::PutItem {
            key: key.to_string(),
            value: value.to_string(),
        })?;

        Ok(())
    }

    /// Send one request and wait for its response.
    pub fn call<T: DeserializeOwned>(&mut self, method: Method) -> Result<T> {
        let id = self.next_id;
        self.next_id += 1;

        let mut line = serde_json::to_vec(&Request { id, method }).map_err(protocol_error)?;
        line.push(b'\n');
        self.writer.write_all(&line)?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(Error::Control {
                kind: ErrorKind::Protocol,
                message: "control plane closed the connection".to_string(),
            });
        }

        let response: Response = serde_json::from_str(&line).map_err(protocol_error)?;

        if response.id != id {
            return Err(Error::Control {
                kind: ErrorKind::Protocol,
                message: format!("expected response {}, got {}", id, response.id),
            });
        }

        match (response.result, response.error) {
            (_, Some(error)) => Err(error.into()),
            (Some(result), None) => serde_json::from_value(result).map_err(protocol_error),
            (None, None) => Err(Error::Control {
                kind: ErrorKind::Protocol,
                message: "empty response".to_string(),
            }),
        }
    }
}
