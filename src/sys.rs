//! Thread synchronisation primitives used by the engine
use crate::Error;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use embassy_time::Duration;
use log::warn;

/// Converts an engine duration into a std duration for blocking waits
pub(crate) fn std_duration(duration: Duration) -> core::time::Duration {
    core::time::Duration::from_micros(duration.as_micros())
}

/// Binary semaphore
#[derive(Clone)]
pub(crate) struct Sem {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Sem {
    /// Creates a semaphore, `released` sets the initial state
    pub(crate) fn new(released: bool) -> Self {
        let (tx, rx) = bounded(1);
        if released {
            let _ = tx.try_send(());
        }
        Self { tx, rx }
    }

    /// Waits up to `timeout` for the semaphore, forever if None
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Result<(), Error> {
        match timeout {
            None => self.rx.recv().map_err(|_| Error::Err),
            Some(timeout) => self.rx.recv_timeout(std_duration(timeout)).map_err(|error| match error {
                RecvTimeoutError::Timeout => Error::Timeout,
                RecvTimeoutError::Disconnected => Error::Err,
            }),
        }
    }

    /// Releases the semaphore, releasing a released semaphore has no effect
    pub(crate) fn release(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Bounded message queue
pub(crate) struct Mbox<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for Mbox<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Mbox<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Puts a message, blocks while the queue is full
    pub(crate) fn put(&self, message: T) -> Result<(), Error> {
        self.tx.send(message).map_err(|_| Error::Err)
    }

    /// Puts a message without blocking
    pub(crate) fn put_now(&self, message: T) -> Result<(), Error> {
        self.tx.try_send(message).map_err(|error| match error {
            TrySendError::Full(_) => {
                warn!("Message queue full");
                Error::Mem
            }
            TrySendError::Disconnected(_) => Error::Err,
        })
    }

    /// Wakes the receiving thread. A full queue already holds a pending wake-up.
    pub(crate) fn notify(&self)
    where
        T: Default,
    {
        let _ = self.tx.try_send(T::default());
    }

    /// Waits up to `timeout` for a message, forever if None
    pub(crate) fn get(&self, timeout: Option<Duration>) -> Result<T, Error> {
        match timeout {
            None => self.rx.recv().map_err(|_| Error::Err),
            Some(timeout) => self.rx.recv_timeout(std_duration(timeout)).map_err(|error| match error {
                RecvTimeoutError::Timeout => Error::Timeout,
                RecvTimeoutError::Disconnected => Error::Err,
            }),
        }
    }

    /// Takes a message if one is queued
    pub(crate) fn get_now(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Receiving half for threads which must not keep the sender alive
    pub(crate) fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }
}
