pub mod aggregate;
pub mod container;
pub mod host;
pub mod location;
pub mod url;

pub use aggregate::ProxyAggregate;
pub use container::{Container, ContainerId};
pub use host::Host;
pub use location::{ExtraValue, Location};
