pub mod acme;
pub mod ssl_processor;

pub use acme::{DomainVerifier, SharedSslManager, SslManager};
pub use ssl_processor::SslProcessor;
