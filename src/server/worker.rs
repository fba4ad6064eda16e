// Per-connection request loop

use std::io::{self, BufRead, BufReader, BufWriter, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

use crate::arrivals::ArrivalParser;
use crate::error::Result;
use crate::models::StopDepartures;
use crate::server::protocol::{
    Command, LINE_TOO_LONG_LINE, MAX_LINE_LEN, UNKNOWN_VERSION, invalid_stop_code_line,
    write_departures, write_line,
};
use crate::server::registry::SessionSlot;
use crate::snapshot::store::{marker_value, read_first_line};
use crate::upstream::Upstream;

/// What every connection worker needs to answer requests.
pub struct ConnectionContext {
    pub db_url: String,
    pub marker_path: PathBuf,
    pub version_path: PathBuf,
    pub upstream: Arc<dyn Upstream>,
}

impl ConnectionContext {
    fn bus_times(&self, stop_code: &str) -> Result<StopDepartures> {
        let html = self.upstream.departures(stop_code)?;
        ArrivalParser::parse(&html)
    }
}

pub struct ClientSession {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    peer: SocketAddr,
    live: bool,
}

impl ClientSession {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> io::Result<Self> {
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream.try_clone()?);
        Ok(ClientSession {
            stream,
            reader,
            writer,
            peer,
            live: true,
        })
    }

    /// Next request line, lossily decoded. `None` on EOF, `InvalidData` when the
    /// line runs past `MAX_LINE_LEN` without a terminator.
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        let read = (&mut self.reader)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        if read == MAX_LINE_LEN && buf.last() != Some(&b'\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("request line longer than {} bytes", MAX_LINE_LEN),
            ));
        }
        Ok(Some(String::from_utf8_lossy(&buf).trim().to_string()))
    }

    fn close(&mut self) {
        if self.live {
            self.live = false;
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct ConnectionWorker {
    session: ClientSession,
    slot: SessionSlot,
    context: Arc<ConnectionContext>,
}

impl ConnectionWorker {
    pub fn new(session: ClientSession, slot: SessionSlot, context: Arc<ConnectionContext>) -> Self {
        ConnectionWorker {
            session,
            slot,
            context,
        }
    }

    /// Serve the client until it leaves or its stream fails, then close the socket
    /// and give the registry slot back.
    pub fn run(self) {
        let slot = self.slot;
        let mut session = self.session;
        let context = self.context;

        let span = info_span!("session", id = slot.id(), peer = %session.peer);
        let _entered = span.enter();
        info!("client connected");

        match serve(&mut session, &context) {
            Ok(()) => info!("client disconnected"),
            Err(e) => debug!(error = %e, "session ended by I/O error"),
        }

        // Close before the slot is released so a freed slot never has a live socket.
        session.close();
        drop(session);
        drop(slot);
    }
}

fn serve(session: &mut ClientSession, context: &ConnectionContext) -> io::Result<()> {
    loop {
        let line = match session.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(error = %e, "⚠️  Oversized request, closing session");
                let _ = write_line(&mut session.writer, LINE_TOO_LONG_LINE);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        if line.is_empty() {
            continue;
        }

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                debug!(request = %line, "rejected request");
                write_line(&mut session.writer, &e.response_line())?;
                continue;
            }
        };

        match command {
            Command::BusTimesByStopCode(stop_code) => match context.bus_times(&stop_code) {
                Ok(departures) => {
                    debug!(
                        stop_code = %stop_code,
                        services = departures.services.len(),
                        arrivals = departures.arrival_count(),
                        "departures served"
                    );
                    write_departures(&mut session.writer, &departures)?;
                }
                Err(e) => {
                    warn!(stop_code = %stop_code, error = %e, "⚠️  Could not get live departures");
                    write_line(&mut session.writer, &invalid_stop_code_line(&stop_code))?;
                }
            },
            Command::DbUrl => write_line(&mut session.writer, &context.db_url)?,
            Command::DbLastModTime => {
                write_line(&mut session.writer, &marker_value(&context.marker_path))?;
            }
            Command::LatestAndroidClientVersion => {
                let version = read_first_line(&context.version_path)
                    .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
                write_line(&mut session.writer, &version)?;
            }
            Command::Exit => {
                session.close();
                break;
            }
        }
    }

    Ok(())
}
