//! Socket and connection management.
//!
//! - [`connectjob`]: ordered endpoint fall-through over a pluggable [`Connect`](connectjob::Connect)
//! - [`stream`]: the type-erased socket a job reads from and writes to

pub mod connectjob;
pub mod stream;
