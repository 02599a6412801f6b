pub mod connection;
pub mod request;
pub mod response;

pub use connection::Connection;
pub use request::Request;
pub use response::Response;
