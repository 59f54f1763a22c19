use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::config::RemoteStreamConfig;
use crate::error::{Result, StreamError};
use crate::stream::{CacheStatus, ReadStatus, RemoteStream};
use crate::telemetry::StreamTelemetrySnapshot;
use crate::transport::{HttpTransport, ReqwestTransport};

enum Command {
    Read {
        len: usize,
        reply: Sender<Result<(ReadStatus, Vec<u8>)>>,
    },
    Seek {
        offset: u64,
        reply: Sender<Result<()>>,
    },
    ContentType {
        reply: Sender<Option<String>>,
    },
    CacheStatus {
        reply: Sender<Result<CacheStatus>>,
    },
    Telemetry {
        reply: Sender<StreamTelemetrySnapshot>,
    },
    Quit,
}

/// Owns a [`RemoteStream`] on a dedicated thread.
///
/// Network reads block the worker, never the caller's thread beyond the command it is waiting on.
/// Commands are processed strictly in order.
#[derive(Debug)]
pub struct RemoteStreamHandle {
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    file_size: u64,
    pending_retry_limit: usize,
}

impl RemoteStreamHandle {
    pub fn open(config: RemoteStreamConfig) -> Result<Self> {
        let transport = ReqwestTransport::new()?;
        Self::open_with_transport(config, transport)
    }

    /// Spawn the worker and open the stream on it. Returns once the open has finished.
    pub fn open_with_transport<T>(config: RemoteStreamConfig, transport: T) -> Result<Self>
    where
        T: HttpTransport + 'static,
    {
        let pending_retry_limit = config.options.pending_retry_limit;
        let (commands, inbox) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let worker = thread::Builder::new()
            .name("rangecache-stream".to_string())
            .spawn(move || {
                match RemoteStream::open_with_transport(config, transport) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(stream.file_size()));
                        run(stream, inbox);
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })?;

        let opened = ready_rx.recv().map_err(|_| StreamError::WorkerGone);
        match opened {
            Ok(Ok(file_size)) => Ok(Self {
                commands,
                worker: Some(worker),
                file_size,
                pending_retry_limit,
            }),
            Ok(Err(err)) | Err(err) => {
                let _ = worker.join();
                Err(err)
            }
        }
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn read(&self, dest: &mut [u8]) -> Result<ReadStatus> {
        let (status, data) = self.request(|reply| Command::Read {
            len: dest.len(),
            reply,
        })??;
        dest[..data.len()].copy_from_slice(&data);
        Ok(status)
    }

    pub fn seek(&self, offset: u64) -> Result<()> {
        self.request(|reply| Command::Seek { offset, reply })?
    }

    pub fn content_type(&self) -> Result<Option<String>> {
        self.request(|reply| Command::ContentType { reply })
    }

    pub fn cache_status(&self) -> Result<CacheStatus> {
        self.request(|reply| Command::CacheStatus { reply })?
    }

    pub fn telemetry(&self) -> Result<StreamTelemetrySnapshot> {
        self.request(|reply| Command::Telemetry { reply })
    }

    /// Stop the worker; the index is persisted before it exits.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn request<R>(&self, make: impl FnOnce(Sender<R>) -> Command) -> Result<R> {
        let (reply, response) = crossbeam_channel::bounded(1);
        self.commands
            .send(make(reply))
            .map_err(|_| StreamError::WorkerGone)?;
        response.recv().map_err(|_| StreamError::WorkerGone)
    }

    fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.commands.send(Command::Quit);
        if worker.join().is_err() {
            tracing::error!("stream worker panicked");
        }
    }
}

impl Drop for RemoteStreamHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<T: HttpTransport>(mut stream: RemoteStream<T>, inbox: Receiver<Command>) {
    for command in inbox.iter() {
        match command {
            Command::Read { len, reply } => {
                let mut buf = vec![0u8; len];
                let result = stream.read(&mut buf).map(|status| {
                    let filled = match status {
                        ReadStatus::Data(n) => n,
                        ReadStatus::Pending | ReadStatus::Eof => 0,
                    };
                    buf.truncate(filled);
                    (status, buf)
                });
                let _ = reply.send(result);
            }
            Command::Seek { offset, reply } => {
                let _ = reply.send(stream.seek(offset));
            }
            Command::ContentType { reply } => {
                let _ = reply.send(stream.content_type().map(str::to_string));
            }
            Command::CacheStatus { reply } => {
                let _ = reply.send(stream.cache_status());
            }
            Command::Telemetry { reply } => {
                let _ = reply.send(stream.telemetry());
            }
            Command::Quit => break,
        }
    }
    stream.close();
}

/// Blocking `std::io` view of a [`RemoteStreamHandle`].
///
/// `Pending` results are retried up to the configured limit; past it the read fails with
/// [`ErrorKind::TimedOut`].
#[derive(Debug)]
pub struct StreamReader {
    handle: RemoteStreamHandle,
    position: u64,
}

impl StreamReader {
    pub fn new(handle: RemoteStreamHandle) -> Self {
        Self {
            handle,
            position: 0,
        }
    }

    pub fn handle(&self) -> &RemoteStreamHandle {
        &self.handle
    }

    pub fn into_inner(self) -> RemoteStreamHandle {
        self.handle
    }
}

fn to_io(err: StreamError) -> io::Error {
    io::Error::other(err)
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut pending = 0;
        loop {
            match self.handle.read(buf).map_err(to_io)? {
                ReadStatus::Data(n) => {
                    self.position += n as u64;
                    return Ok(n);
                }
                ReadStatus::Eof => return Ok(0),
                ReadStatus::Pending => {
                    pending += 1;
                    if pending > self.handle.pending_retry_limit {
                        return Err(io::Error::new(
                            ErrorKind::TimedOut,
                            format!("no data at offset {} after {pending} attempts", self.position),
                        ));
                    }
                }
            }
        }
    }
}

impl Seek for StreamReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.handle.file_size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidInput, "seek to a negative or overflowing offset")
        })?;

        self.handle.seek(target).map_err(to_io)?;
        self.position = target;
        Ok(target)
    }
}
