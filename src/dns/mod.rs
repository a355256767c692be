//! DNS Resolution Module
//!
//! The resolver stage of a [`RequestJob`](crate::urlrequest::job::RequestJob)
//! turns the target host into an ordered list of candidate endpoints through
//! the [`Resolve`] trait:
//! - [`GaiResolver`]: system resolver (getaddrinfo via the blocking pool), the default
//! - [`HickoryResolver`]: fully async resolver
//! - [`DnsResolverWithOverrides`]: hostname-to-address override layer
//!
//! # Example
//!
//! ```rust,ignore
//! use urlfetcher::dns::{GaiResolver, Name, Resolve};
//!
//! let resolver = GaiResolver::new();
//! let addrs = resolver.resolve(Name::new("example.com")).await?;
//! for addr in addrs {
//!     println!("Resolved: {}", addr);
//! }
//! ```

mod gai;
mod hickory;
mod resolve;

pub use gai::{GaiResolver, SocketAddrs};
pub use hickory::HickoryResolver;
pub use resolve::{resolve_endpoints, Addrs, DnsResolverWithOverrides, Name, Resolve, Resolving};
