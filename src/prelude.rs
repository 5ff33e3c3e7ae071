pub use crate::archive::{Archivable, Archive};
pub use crate::client::Client;
pub use crate::error::{Error, Result};
pub use crate::functor::{make_functor, AbstractFunctor, FunctorMap};
pub use crate::net::connection::Connection;
pub use crate::net::message::{Message, MessageType};
pub use crate::net::socket::UnixSocket;
pub use crate::reactor::Mainloop;
pub use crate::server::Server;
