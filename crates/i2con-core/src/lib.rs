//! Client and server engines for remote I2C register access.
//!
//! A [`Client`] forwards register reads and writes over TCP to a [`Server`],
//! which runs one [`Session`] per connection against a local bus opened
//! through a [`BusProvider`].

pub mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod server;
pub mod session;
pub mod transcript;
pub mod transport;

pub use bus::{Bus, BusLocks, BusProvider, MemoryBus};
pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use error::{ClientError, TransportError};
pub use server::{shutdown_channel, Server, ServerEvent, Shutdown, ShutdownHandle};
pub use session::{Session, SessionEnd};
pub use transcript::{Direction, FrameEntry, FrameLog};

pub use i2con_proto as proto;
