// Library exports for election-mailer
// This allows the binary and the integration tests to use the modules

pub mod batch;
pub mod config;
pub mod email;
pub mod error;
pub mod operator;
pub mod sender;
pub mod transport;
