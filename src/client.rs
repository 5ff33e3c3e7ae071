use std::sync::Mutex;

use crate::archive::Archivable;
use crate::error::Result;
use crate::logging;
use crate::logging::Logger;
use crate::net::connection::Connection;
use crate::net::message::{Message, MessageType};

/// Invokes methods exposed by a remote server over one persistent
/// connection. May be shared between threads; an outer lock keeps at most
/// one request in flight, so replies always match their requests.
pub struct Client {
    connection: Connection,
    lock: Mutex<()>,
    log: Logger,
}

impl Client {
    pub fn connect<'a, L: Into<Option<&'a Logger>>>(path: &str, log: L) -> Result<Client> {
        Ok(Client {
            connection: Connection::connect(path)?,
            lock: Mutex::new(()),
            log: logging::child(log),
        })
    }

    /// Calls the remote method registered under `name` with the argument
    /// tuple `args`, returning its result. Failures surface the originating
    /// error; nothing is retried.
    pub fn invoke<R, A>(&self, name: &str, args: A) -> Result<R>
    where
        R: Archivable + Default,
        A: Archivable,
    {
        let mut message = Message::new(MessageType::MethodCall, name);
        message.enclose(&args);

        let _guard = self.lock.lock().unwrap();

        logging::debug!(self.log, "invoking"; "signature" => name);

        let mut reply = self.connection.request(&mut message)?;
        reply.disclose()
    }
}
