pub mod connection;
pub mod dispatcher;
pub mod rate_limit;

pub use dispatcher::Dispatcher;
