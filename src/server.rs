use hashbrown::HashMap;
use indexmap::IndexSet;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use crate::archive::Archivable;
use crate::error::{Error, Result};
use crate::functor::{make_functor, AbstractFunctor, FunctorMap, Method};
use crate::logging;
use crate::logging::Logger;
use crate::net::connection::Connection;
use crate::net::message::{Message, MessageType};
use crate::net::socket::UnixSocket;
use crate::reactor::Mainloop;

/// Exposes bound methods on one or more listen paths. All accepted
/// connections are served by a single reactor thread: accept, read and
/// close events dispatch on the thread that called `start`.
pub struct Server {
    mainloop: Arc<Mainloop>,
    paths: Mutex<IndexSet<String>>,
    connections: Mutex<HashMap<RawFd, Arc<Connection>>>,
    functors: Mutex<FunctorMap>,
    log: Logger,
}

impl Server {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(log: L) -> Result<Arc<Server>> {
        let log = logging::child(log);
        let mainloop = Arc::new(Mainloop::new(&log)?);

        Ok(Arc::new(Server {
            mainloop,
            paths: Mutex::new(IndexSet::new()),
            connections: Mutex::new(HashMap::new()),
            functors: Mutex::new(FunctorMap::new()),
            log,
        }))
    }

    /// Records a path to bind when the server starts.
    pub fn listen(&self, path: &str) {
        self.paths.lock().unwrap().insert(path.to_string());
    }

    /// Registers `method` on `instance` under `name`. A later registration
    /// under the same name replaces the earlier one.
    pub fn expose<K, M, A, R>(&self, instance: &Arc<Mutex<K>>, name: &str, method: M)
    where
        K: Send + 'static,
        M: Method<K, A, R>,
        A: Archivable + Default + Send + 'static,
        R: Archivable + Send + 'static,
    {
        let functor: Arc<dyn AbstractFunctor> = Arc::new(make_functor(instance, method));
        self.functors.lock().unwrap().insert(name.to_string(), functor);

        logging::debug!(self.log, "method exposed"; "signature" => name);
    }

    /// Binds every recorded path and runs the reactor until `stop`.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let paths: Vec<String> = self.paths.lock().unwrap().iter().cloned().collect();

        for path in paths {
            let listener = Arc::new(UnixSocket::open(&path)?);
            let server = Arc::downgrade(self);
            let accept_from = Arc::clone(&listener);

            let on_accept = Box::new(move || {
                let server = match server.upgrade() {
                    Some(server) => server,
                    None => return Ok(()),
                };

                let connection = Arc::new(Connection::new(accept_from.accept()?));
                server.on_accept(connection)
            });

            self.mainloop.add_handler(listener.fd(), on_accept, None)?;

            logging::info!(self.log, "listening"; "path" => %path, "fd" => listener.fd());
        }

        self.mainloop.run(None)
    }

    /// Deregisters every accepted connection and stops the reactor. Safe to
    /// call from any thread.
    pub fn stop(&self) -> Result<()> {
        {
            let connections = self.connections.lock().unwrap();
            for (&fd, _) in connections.iter() {
                self.mainloop.remove_handler(fd);
            }
        }

        logging::info!(self.log, "stopping");
        self.mainloop.stop()
    }

    fn on_accept(self: &Arc<Self>, connection: Arc<Connection>) -> Result<()> {
        let fd = connection.fd();

        logging::debug!(self.log, "peer accepted"; "fd" => fd);

        // Both handlers hold the connection so the descriptor stays open,
        // and with it unambiguous, until the handlers are removed.
        let on_read = {
            let server = Arc::downgrade(self);
            let connection = Arc::clone(&connection);

            Box::new(move || match server.upgrade() {
                Some(server) => server.on_read(connection.fd()),
                None => Ok(()),
            })
        };

        let on_error = {
            let server = Arc::downgrade(self);
            let connection = Arc::clone(&connection);

            Box::new(move || {
                if let Some(server) = server.upgrade() {
                    server.on_close(connection.fd());
                }
                Ok(())
            })
        };

        self.mainloop.add_handler(fd, on_read, Some(on_error))?;

        // Data may already be waiting behind the accept, so serve one
        // request up front.
        let mut connections = self.connections.lock().unwrap();
        self.dispatch(&connection)?;
        connections.insert(fd, connection);

        Ok(())
    }

    fn on_read(&self, fd: RawFd) -> Result<()> {
        let connections = self.connections.lock().unwrap();

        let connection = connections.get(&fd).ok_or(Error::InvalidArgument)?;
        self.dispatch(connection)
    }

    fn on_close(&self, fd: RawFd) {
        logging::debug!(self.log, "peer closed"; "fd" => fd);

        let mut connections = self.connections.lock().unwrap();

        self.mainloop.remove_handler(fd);
        connections.remove(&fd);
    }

    /// One request/reply cycle: receive, look up the signature, invoke,
    /// reply with the result under the same signature.
    fn dispatch(&self, connection: &Connection) -> Result<()> {
        let mut request = connection.recv()?;

        logging::trace!(self.log, "request received";
                        "signature" => %request.signature,
                        "id" => request.header.id,
                        "length" => request.header.length);

        if request.kind() != MessageType::MethodCall {
            return Err(Error::UnknownMethod);
        }

        let functor = {
            let functors = self.functors.lock().unwrap();
            functors
                .get(&request.signature)
                .cloned()
                .ok_or(Error::UnknownMethod)?
        };

        let result = functor.invoke(&mut request.archive)?;

        let mut reply = Message::new(MessageType::Reply, &request.signature);
        reply.enclose(&result);

        connection.send(&mut reply)
    }
}
