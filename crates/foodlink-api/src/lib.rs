pub mod auth;
pub mod donations;
pub mod error;
pub mod feedback;
pub mod middleware;
pub mod users;
