//! Callback dispatch
//!
//! Every user-observable event is queued on an unbounded channel and delivered by one
//! dedicated thread, so registered callbacks never run concurrently with each other and
//! never run on an I/O task. Delivery follows enqueue order.

use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::Result;

/// Callback receiving a status or error message
pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback receiving a subscriber id and connection id
pub type ConnectionCallback = Arc<dyn Fn(Uuid, &str) + Send + Sync>;

enum Dispatch {
    Status(String),
    Error(String),
    ClientConnected { subscriber_id: Uuid, connection_id: String },
    ClientDisconnected { subscriber_id: Uuid, connection_id: String },
    /// Wakes the delivery thread so it can observe the shutdown flag
    Wake,
}

#[derive(Default)]
struct Callbacks {
    status: RwLock<Option<MessageCallback>>,
    error: RwLock<Option<MessageCallback>>,
    client_connected: RwLock<Option<ConnectionCallback>>,
    client_disconnected: RwLock<Option<ConnectionCallback>>,
}

impl Callbacks {
    fn deliver(&self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Status(message) => {
                let callback = self.status.read().clone();
                if let Some(callback) = callback {
                    callback(&message);
                }
            }
            Dispatch::Error(message) => {
                let callback = self.error.read().clone();
                if let Some(callback) = callback {
                    callback(&message);
                }
            }
            Dispatch::ClientConnected {
                subscriber_id,
                connection_id,
            } => {
                let callback = self.client_connected.read().clone();
                if let Some(callback) = callback {
                    callback(subscriber_id, &connection_id);
                }
            }
            Dispatch::ClientDisconnected {
                subscriber_id,
                connection_id,
            } => {
                let callback = self.client_disconnected.read().clone();
                if let Some(callback) = callback {
                    callback(subscriber_id, &connection_id);
                }
            }
            Dispatch::Wake => {}
        }
    }
}

/// Serializes callback delivery onto a single thread
pub struct CallbackDispatcher {
    tx: mpsc::UnboundedSender<Dispatch>,
    callbacks: Arc<Callbacks>,
    disposing: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CallbackDispatcher {
    /// Start the delivery thread
    pub fn new() -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();
        let callbacks = Arc::new(Callbacks::default());
        let disposing = Arc::new(AtomicBool::new(false));

        let thread = {
            let callbacks = Arc::clone(&callbacks);
            let disposing = Arc::clone(&disposing);

            thread::Builder::new()
                .name("gep-callbacks".to_string())
                .spawn(move || {
                    while let Some(dispatch) = rx.blocking_recv() {
                        if disposing.load(Ordering::SeqCst) {
                            break;
                        }

                        if catch_unwind(AssertUnwindSafe(|| callbacks.deliver(dispatch))).is_err()
                        {
                            error!("User callback panicked; continuing dispatch");
                        }
                    }
                })?
        };

        Ok(Self {
            tx,
            callbacks,
            disposing,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn enqueue(&self, dispatch: Dispatch) {
        if self.tx.send(dispatch).is_err() {
            warn!("Callback dispatcher has shut down; event dropped");
        }
    }

    /// Queue a status message
    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.enqueue(Dispatch::Status(message));
    }

    /// Queue an error message
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.enqueue(Dispatch::Error(message));
    }

    pub fn client_connected(&self, subscriber_id: Uuid, connection_id: impl Into<String>) {
        self.enqueue(Dispatch::ClientConnected {
            subscriber_id,
            connection_id: connection_id.into(),
        });
    }

    pub fn client_disconnected(&self, subscriber_id: Uuid, connection_id: impl Into<String>) {
        self.enqueue(Dispatch::ClientDisconnected {
            subscriber_id,
            connection_id: connection_id.into(),
        });
    }

    pub fn set_status_callback(&self, callback: Option<MessageCallback>) {
        *self.callbacks.status.write() = callback;
    }

    pub fn set_error_callback(&self, callback: Option<MessageCallback>) {
        *self.callbacks.error.write() = callback;
    }

    pub fn set_client_connected_callback(&self, callback: Option<ConnectionCallback>) {
        *self.callbacks.client_connected.write() = callback;
    }

    pub fn set_client_disconnected_callback(&self, callback: Option<ConnectionCallback>) {
        *self.callbacks.client_disconnected.write() = callback;
    }

    pub fn is_shut_down(&self) -> bool {
        self.disposing.load(Ordering::SeqCst)
    }

    /// Raise the shutdown flag and wait for the delivery thread to exit.
    /// Events still queued at that point are dropped.
    pub fn shutdown(&self) {
        if self.disposing.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.tx.send(Dispatch::Wake);

        if let Some(handle) = self.thread.lock().take() {
            // A callback tearing down its own publisher must not join itself
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("Callback thread terminated abnormally");
            }
        }
    }
}

impl Drop for CallbackDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
