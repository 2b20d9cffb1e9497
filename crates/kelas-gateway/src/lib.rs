pub mod connection;
pub mod dispatcher;
mod session;
