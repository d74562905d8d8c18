use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, info_span, warn, Span};

use super::{handle, ControlApi, ErrorBody, Request, Response};
use crate::error::ErrorKind;
use crate::{Error, Result};

/// Longest request line a session accepts, newline excluded.
pub const MAX_REQUEST_LINE: u64 = 64 * 1024;

#[derive(Debug)]
/// Serves [ControlApi] on a unix socket, one thread per client session.
pub struct ControlServer {
    path: PathBuf,
    stopped: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ControlServer {
    /// Remove any stale socket file at `path`, bind, and start accepting clients.
    pub fn bind<A: ControlApi>(path: &Path, api: A, log_label: &str) -> Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(?path, "Removed stale control socket"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(Error::storage(path, error)),
        }

        let listener = UnixListener::bind(path).map_err(|error| Error::storage(path, error))?;

        info!(?path, "Control plane exposed");

        let stopped = Arc::new(AtomicBool::new(false));
        let span = info_span!("node", label = %log_label);

        let accept_thread = {
            let stopped = stopped.clone();

            thread::Builder::new()
                .name(format!("{log_label} control"))
                .spawn(move || accept(listener, api, stopped, span))?
        };

        Ok(ControlServer {
            path: path.to_path_buf(),
            stopped,
            accept_thread: Mutex::new(Some(accept_thread)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting clients and remove the socket file. Open sessions end
    /// when their client disconnects.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // Wake up the accept loop so it sees the flag.
        let _ = UnixStream::connect(&self.path);

        let handle = match self.accept_thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        let _ = std::fs::remove_file(&self.path);
    }
}

fn accept<A: ControlApi>(listener: UnixListener, api: A, stopped: Arc<AtomicBool>, span: Span) {
    let _entered = span.enter();

    for stream in listener.incoming() {
        if stopped.load(Ordering::SeqCst) {
            break;
        }

        match stream {
            Ok(stream) => {
                let api = api.clone();
                let span = span.clone();

                let spawned = thread::Builder::new()
                    .name("control session".to_string())
                    .spawn(move || {
                        let _entered = span.enter();
                        session(stream, api)
                    });

                if let Err(error) = spawned {
                    warn!(%error, "Could not start a control session");
                }
            }
            Err(error) => warn!(%error, "Control plane accept failed"),
        }
    }

    debug!("Control plane stopped");
}

fn session<A: ControlApi>(stream: UnixStream, api: A) {
    debug!("Control session opened");

    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(error) => {
            warn!(%error, "Could not clone control session stream");
            return;
        }
    };

    let mut reader = BufReader::new(stream);

    loop {
        let mut line = Vec::new();

        match (&mut reader)
            .take(MAX_REQUEST_LINE + 1)
            .read_until(b'\n', &mut line)
        {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) => {
                debug!(%error, "Control session read failed");
                break;
            }
        }

        if !line.ends_with(b"\n") && line.len() as u64 > MAX_REQUEST_LINE {
            warn!(limit = MAX_REQUEST_LINE, "Control request too long, closing session");

            let response = protocol_error_response(format!(
                "request line exceeds {MAX_REQUEST_LINE} bytes"
            ));
            let _ = write_line(&mut writer, &response);
            break;
        }

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let response = match serde_json::from_slice::<Request>(&line) {
            Ok(request) => handle(&api, request),
            Err(error) => protocol_error_response(error.to_string()),
        };

        if let Err(error) = write_line(&mut writer, &response) {
            debug!(%error, "Control session write failed");
            break;
        }
    }

    debug!("Control session closed");
}

fn protocol_error_response(message: String) -> Response {
    Response {
        id: 0,
        result: None,
        error: Some(ErrorBody {
            kind: ErrorKind::Protocol,
            message,
        }),
    }
}

fn write_line(writer: &mut UnixStream, response: &Response) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');

    writer.write_all(&line)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::common::Contact;
    use crate::control::{ControlClient, ControlInfo};

    #[derive(Clone)]
    struct Echo;

    impl ControlApi for Echo {
        fn get_info(&self) -> ControlInfo {
            ControlInfo {
                version: "test".into(),
            }
        }

        fn get_peers(&self, _key: &str, _limit: usize) -> Result<Vec<Contact>> {
            Ok(vec![])
        }

        fn get_item(&self, key: &str) -> Result<Vec<u8>> {
            Ok(key.as_bytes().to_vec())
        }

        fn put_item(&self, _key: &str, _value: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.sock");

        std::fs::write(&path, b"left over").unwrap();

        let server = ControlServer::bind(&path, Echo, "test").unwrap();

        let mut client = ControlClient::connect(&path).unwrap();
        assert_eq!(client.get_info().unwrap().version, "test");
        assert_eq!(client.get_item("k").unwrap(), "k");

        server.shutdown();
        server.shutdown();

        assert!(!path.exists());
    }

    #[test]
    fn garbage_gets_a_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.sock");
        let server = ControlServer::bind(&path, Echo, "test").unwrap();

        let mut stream = UnixStream::connect(&path).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(b"not json\n").unwrap();

        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).unwrap();

        let response: Response = serde_json::from_str(&line).unwrap();
        assert_eq!(response.error.unwrap().kind, ErrorKind::Protocol);

        server.shutdown();
    }

    #[test]
    fn overlong_request_line_closes_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.sock");
        let server = ControlServer::bind(&path, Echo, "test").unwrap();

        let mut stream = UnixStream::connect(&path).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        // No newline, ever.
        let garbage = vec![b'a'; MAX_REQUEST_LINE as usize + 10];
        stream.write_all(&garbage).unwrap();

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();

        let response: Response = serde_json::from_str(&line).unwrap();
        assert_eq!(response.error.unwrap().kind, ErrorKind::Protocol);

        // Closed by the server, possibly reset over the unread tail.
        line.clear();
        assert!(matches!(reader.read_line(&mut line), Ok(0) | Err(_)));

        server.shutdown();
    }
}
