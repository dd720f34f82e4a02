use crate::bus::{BusLocks, BusProvider};
use crate::config::ServerConfig;
use crate::session::{Session, SessionEnd};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{info, warn};
use std::io;
use std::net::{Shutdown as SocketShutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub enum ServerEvent {
    Listening(SocketAddr),
    Connected(SocketAddr),
    Disconnected(SocketAddr, SessionEnd),
    Error(String),
}

/// Cancellation token observed by the accept loop between connections.
///
/// Triggered by [`ShutdownHandle::trigger`] or by dropping the handle.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: Receiver<()>,
}

#[derive(Debug)]
pub struct ShutdownHandle {
    _tx: Sender<()>,
}

pub fn shutdown_channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = bounded(0);
    (ShutdownHandle { _tx: tx }, Shutdown { rx })
}

impl ShutdownHandle {
    pub fn trigger(self) {
        drop(self);
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for up to `timeout`, waking early on shutdown. Returns whether
    /// shutdown was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Disconnected))
    }
}

/// Accepts connections and runs one [`Session`] per connection on its own
/// thread. Sessions share only the bus provider and the per-bus locks.
pub struct Server<P> {
    provider: Arc<P>,
    cfg: ServerConfig,
    locks: Arc<BusLocks>,
    events: Option<Sender<ServerEvent>>,
}

impl<P: BusProvider + 'static> Server<P> {
    pub fn new(provider: P, cfg: ServerConfig) -> Self {
        Self {
            provider: Arc::new(provider),
            cfg,
            locks: Arc::new(BusLocks::new()),
            events: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.cfg
    }

    /// Receive lifecycle events from now on. Replaces any earlier subscriber.
    pub fn subscribe(&mut self) -> Receiver<ServerEvent> {
        let (tx, rx) = unbounded();
        self.events = Some(tx);
        rx
    }

    pub fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind(self.cfg.socket_addr())
    }

    /// Bind to the configured address and serve until `shutdown` fires.
    pub fn run(&self, shutdown: &Shutdown) -> io::Result<()> {
        let listener = self.bind()?;
        self.serve(listener, shutdown)
    }

    /// Accept connections on `listener` until `shutdown` fires. Sessions
    /// already running are left to finish on their own.
    pub fn serve(&self, listener: TcpListener, shutdown: &Shutdown) -> io::Result<()> {
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;
        info!("listening for i2c requests on {local}");
        emit(&self.events, ServerEvent::Listening(local));

        while !shutdown.is_triggered() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.spawn_session(stream, peer) {
                        warn!("could not start session for {peer}: {e}");
                        emit(&self.events, ServerEvent::Error(e.to_string()));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    shutdown.wait(self.cfg.accept_poll);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("accept failed: {e}");
                    emit(&self.events, ServerEvent::Error(e.to_string()));
                    shutdown.wait(self.cfg.accept_poll);
                }
            }
        }
        info!("stopped accepting connections on {local}");
        Ok(())
    }

    fn spawn_session(&self, mut stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(self.cfg.nodelay)?;
        stream.set_read_timeout(self.cfg.io_timeout)?;
        stream.set_write_timeout(self.cfg.io_timeout)?;

        let provider = self.provider.clone();
        let locks = self.locks.clone();
        let events = self.events.clone();
        std::thread::Builder::new()
            .name(format!("i2con-session-{peer}"))
            .spawn(move || {
                info!("connected to {peer}");
                emit(&events, ServerEvent::Connected(peer));
                let end = Session::new(&*provider, &locks).run(&mut stream);
                let _ = stream.shutdown(SocketShutdown::Both);
                info!("disconnected from {peer}: {end}");
                emit(&events, ServerEvent::Disconnected(peer, end));
            })?;
        Ok(())
    }
}

fn emit(events: &Option<Sender<ServerEvent>>, event: ServerEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn shutdown_fires_on_trigger_or_drop() {
        let (handle, token) = shutdown_channel();
        assert!(!token.is_triggered());
        assert!(!token.wait(Duration::from_millis(1)));
        handle.trigger();
        assert!(token.is_triggered());
        assert!(token.clone().is_triggered());

        let (handle, token) = shutdown_channel();
        drop(handle);
        assert!(token.is_triggered());
    }

    #[test]
    fn wait_returns_early_on_shutdown() {
        let (handle, token) = shutdown_channel();
        let waiter = std::thread::spawn(move || {
            let start = Instant::now();
            assert!(token.wait(Duration::from_secs(30)));
            start.elapsed()
        });
        std::thread::sleep(Duration::from_millis(20));
        handle.trigger();
        assert!(waiter.join().unwrap() < Duration::from_secs(30));
    }
}
