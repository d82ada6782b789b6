//! Stop requests delivered to the reactor through a self-pipe.
//!
//! The read end is registered with the reactor like any socket. Writing one
//! byte to the other end, from a signal handler or from [`ShutdownHandle`],
//! wakes the reactor out of its wait.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::SigId;
use signal_hook::consts::SIGINT;

/// Cloneable trigger for a running server.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    writer: Arc<UnixStream>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        if self.flag.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = (&*self.writer).write(&[1]) {
            if e.kind() != io::ErrorKind::WouldBlock {
                tracing::warn!(error = %e, "Failed to wake the reactor");
            }
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct Shutdown {
    reader: UnixStream,
    handle: ShutdownHandle,
    signals: Vec<SigId>,
}

impl Shutdown {
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;

        Ok(Self {
            reader,
            handle: ShutdownHandle {
                flag: Arc::new(AtomicBool::new(false)),
                writer: Arc::new(writer),
            },
            signals: Vec::new(),
        })
    }

    pub fn handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Routes SIGINT into the self-pipe.
    pub fn install_sigint(&mut self) -> io::Result<()> {
        let flag = signal_hook::flag::register(SIGINT, Arc::clone(&self.handle.flag))?;
        self.signals.push(flag);

        let pipe = signal_hook::low_level::pipe::register(SIGINT, self.handle.writer.try_clone()?)?;
        self.signals.push(pipe);

        tracing::debug!("SIGINT handler installed");
        Ok(())
    }

    pub fn wakeup_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    pub fn is_triggered(&self) -> bool {
        self.handle.is_triggered()
    }

    /// Empties the pipe after a wake-up.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}

impl Drop for Shutdown {
    fn drop(&mut self) {
        for id in self.signals.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}
