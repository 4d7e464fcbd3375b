//! Consumer callbacks keyed by message type.
//!
//! The receiver thread looks a callback up for every decoded message while
//! other threads may register at any time, so the table sits behind a
//! read-mostly lock. Lookups clone the `Arc` and release the lock before the
//! callback runs; a callback is free to register or unregister handlers.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::message::{ImuMsg, Message};
use crate::protocol::MessageType;

pub type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Default)]
pub struct CallbackRegistry {
    table: RwLock<HashMap<MessageType, Callback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `callback` for `msg_type`, replacing any previous one.
    pub fn register<F>(&self, msg_type: MessageType, callback: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.table.write().insert(msg_type, Arc::new(callback));
    }

    /// Installs a callback that receives IMU samples only.
    pub fn register_imu<F>(&self, callback: F)
    where
        F: Fn(&ImuMsg) + Send + Sync + 'static,
    {
        self.register(MessageType::Imu, move |message| {
            if let Message::Imu(imu) = message {
                callback(imu);
            }
        });
    }

    /// Removes the callback for `msg_type`. Returns whether one was installed.
    pub fn unregister(&self, msg_type: MessageType) -> bool {
        self.table.write().remove(&msg_type).is_some()
    }

    pub fn get(&self, msg_type: MessageType) -> Option<Callback> {
        self.table.read().get(&msg_type).cloned()
    }

    pub fn is_registered(&self, msg_type: MessageType) -> bool {
        self.table.read().contains_key(&msg_type)
    }

    /// Runs the callback for the message's type, if any. Returns whether a
    /// callback ran.
    pub fn dispatch(&self, message: &Message) -> bool {
        match self.get(message.message_type()) {
            Some(callback) => {
                callback(message);
                true
            }
            None => false,
        }
    }
}
