use crate::{
    error::{Result, TestbedError},
    messages::signal::{END_OF_EXPERIMENT, START_OF_EXPERIMENT},
};
use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, error, info, warn};

/// Default wait between accept polls.
pub const DEFAULT_ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Time a connected peer gets to deliver its marker before it is dropped.
const PEER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared "experiment ended" flag. Starts false and can only ever become
/// true. The termination listener is the only writer; every sampling cycle
/// reads it. Clones share the same cell.
#[derive(Clone, Debug, Default)]
pub struct ExperimentEndedFlag(Arc<AtomicBool>);

impl ExperimentEndedFlag {
    /// A fresh flag, one per receiver.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Flip the flag. Returns true only for the call that made the transition.
    pub(crate) fn set(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// The termination signal channel in its Armed state: a bound TCP listener
/// that has not been handed to its background thread yet. Binding here, on
/// the caller's thread, means a taken port fails construction instead of
/// silently killing the background thread.
pub struct TerminationListener {
    listener: TcpListener,
    poll_interval: Duration,
    handshake: bool,
}

impl TerminationListener {
    /// Bind the termination port.
    ///
    /// * `address`: where to listen, normally `0.0.0.0:8011`.
    /// * `poll_interval`: wait between accept attempts.
    /// * `handshake`: write `start_of_experiment` to the first peer.
    pub fn bind<A: ToSocketAddrs>(
        address: A,
        poll_interval: Duration,
        handshake: bool,
    ) -> Result<Self> {
        if poll_interval.is_zero() {
            return Err(TestbedError::InvalidConfiguration(
                "termination accept poll interval must be positive".to_string(),
            ));
        }
        let listener = TcpListener::bind(address)?;
        // Accept returns WouldBlock instead of parking the thread, so the loop
        // can notice a shutdown request between polls.
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            poll_interval,
            handshake,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Move the listener onto its own thread. It sets `ended` once and exits.
    pub fn spawn(self, ended: ExperimentEndedFlag) -> Result<TerminationHandle> {
        let local_addr = self.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let thread = thread::Builder::new()
            .name("termination-listener".to_string())
            .spawn(move || self.run(ended, thread_shutdown))?;

        info!(%local_addr, "waiting for end of experiment");
        Ok(TerminationHandle {
            local_addr,
            shutdown,
            thread: Some(thread),
        })
    }

    /// Accept loop. Peers are read on their own threads so a slow or silent
    /// peer never holds up the next connection.
    fn run(self, ended: ExperimentEndedFlag, shutdown: Arc<AtomicBool>) -> Result<()> {
        let mut handshake_pending = self.handshake;
        loop {
            if ended.is_set() {
                return Ok(());
            }
            if shutdown.load(Ordering::Acquire) {
                debug!("termination listener stopped before the experiment ended");
                return Ok(());
            }

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let handshake = std::mem::take(&mut handshake_pending);
                    Self::spawn_peer(stream, peer, handshake, &ended, &shutdown);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    thread::sleep(self.poll_interval);
                }
                Err(e) => {
                    error!(
                        error = %e,
                        "termination listener failed, end of experiment will not be seen"
                    );
                    return Err(e.into());
                }
            }
        }
    }

    fn spawn_peer(
        stream: TcpStream,
        peer: SocketAddr,
        handshake: bool,
        ended: &ExperimentEndedFlag,
        shutdown: &Arc<AtomicBool>,
    ) {
        let ended = ended.clone();
        let shutdown = shutdown.clone();
        let spawned = thread::Builder::new()
            .name("termination-peer".to_string())
            .spawn(move || match Self::serve(stream, handshake) {
                Ok(true) if shutdown.load(Ordering::Acquire) => {
                    debug!(%peer, "end of experiment arrived after shutdown");
                }
                Ok(true) => {
                    if ended.set() {
                        info!(%peer, "experiment ended");
                    }
                }
                Ok(false) => {
                    warn!(%peer, "ignored a peer that did not send {END_OF_EXPERIMENT}")
                }
                Err(e) => warn!(%peer, error = %e, "termination peer dropped"),
            });
        if let Err(e) = spawned {
            warn!(%peer, error = %e, "could not start a reader for termination peer");
        }
    }

    /// Handle one peer. Ok(true) when it delivered the end marker.
    fn serve(mut stream: TcpStream, handshake: bool) -> io::Result<bool> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(PEER_READ_TIMEOUT))?;

        if handshake {
            stream.write_all(START_OF_EXPERIMENT.as_bytes())?;
        }

        let mut body = [0u8; END_OF_EXPERIMENT.len()];
        stream.read_exact(&mut body)?;
        Ok(body == END_OF_EXPERIMENT.as_bytes())
    }
}

/// Owner's side of a running termination listener. Dropping it asks the
/// thread to stop at its next poll without waiting for it.
pub struct TerminationHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl TerminationHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True once the listener thread has exited, either after signalling or on failure.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the listener if it is still Armed and wait for its thread.
    /// Returns the error that ended the thread, if any.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| {
                TestbedError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "termination listener thread panicked",
                ))
            })?,
            None => Ok(()),
        }
    }
}

impl Drop for TerminationHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn armed() -> (TerminationHandle, ExperimentEndedFlag) {
        let ended = ExperimentEndedFlag::new();
        let handle = TerminationListener::bind("127.0.0.1:0", Duration::from_millis(10), false)
            .unwrap()
            .spawn(ended.clone())
            .unwrap();
        (handle, ended)
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_flag_is_write_once() {
        let flag = ExperimentEndedFlag::new();
        let reader = flag.clone();
        assert!(!reader.is_set());
        assert!(flag.set());
        assert!(!flag.set());
        assert!(reader.is_set());
    }

    #[test]
    fn test_end_marker_sets_flag() {
        let (handle, ended) = armed();
        assert!(!ended.is_set());

        let mut peer = TcpStream::connect(handle.local_addr()).unwrap();
        peer.write_all(END_OF_EXPERIMENT.as_bytes()).unwrap();

        assert!(wait_for(|| ended.is_set()));
        assert!(wait_for(|| handle.is_finished()));
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_wrong_marker_keeps_listening() {
        let (handle, ended) = armed();

        let mut impostor = TcpStream::connect(handle.local_addr()).unwrap();
        impostor.write_all(b"end_of_simulation").unwrap();
        drop(impostor);

        // A peer that hangs up without a body is not a signal either.
        drop(TcpStream::connect(handle.local_addr()).unwrap());

        thread::sleep(Duration::from_millis(100));
        assert!(!ended.is_set());
        assert!(!handle.is_finished());

        let mut peer = TcpStream::connect(handle.local_addr()).unwrap();
        peer.write_all(END_OF_EXPERIMENT.as_bytes()).unwrap();
        assert!(wait_for(|| ended.is_set()));
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_silent_peer_does_not_delay_end_marker() {
        let (handle, ended) = armed();

        let _silent = TcpStream::connect(handle.local_addr()).unwrap();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        let mut peer = TcpStream::connect(handle.local_addr()).unwrap();
        peer.write_all(END_OF_EXPERIMENT.as_bytes()).unwrap();

        assert!(wait_for(|| ended.is_set()));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(wait_for(|| handle.is_finished()));
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_trickling_peer_does_not_delay_end_marker() {
        let (handle, ended) = armed();

        let mut trickler = TcpStream::connect(handle.local_addr()).unwrap();
        trickler.write_all(b"end_").unwrap();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        let mut peer = TcpStream::connect(handle.local_addr()).unwrap();
        peer.write_all(END_OF_EXPERIMENT.as_bytes()).unwrap();

        assert!(wait_for(|| ended.is_set()));
        assert!(started.elapsed() < Duration::from_secs(1));
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_handshake_goes_to_first_peer() {
        let ended = ExperimentEndedFlag::new();
        let handle = TerminationListener::bind("127.0.0.1:0", Duration::from_millis(10), true)
            .unwrap()
            .spawn(ended.clone())
            .unwrap();

        let mut peer = TcpStream::connect(handle.local_addr()).unwrap();
        let mut greeting = [0u8; START_OF_EXPERIMENT.len()];
        peer.read_exact(&mut greeting).unwrap();
        assert_eq!(&greeting, START_OF_EXPERIMENT.as_bytes());

        peer.write_all(END_OF_EXPERIMENT.as_bytes()).unwrap();
        assert!(wait_for(|| ended.is_set()));
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_while_armed() {
        let (handle, ended) = armed();
        handle.shutdown().unwrap();
        assert!(!ended.is_set());
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let result = TerminationListener::bind("127.0.0.1:0", Duration::ZERO, false);
        assert!(matches!(result, Err(TestbedError::InvalidConfiguration(_))));
    }
}
