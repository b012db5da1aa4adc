//! Foundational system components for the sinker's services.
//!
//! Services are long-running tasks that receive messages through an [`Addr`] and process them in
//! their own loop. The [`Controller`] listens to process signals and broadcasts a [`Shutdown`] to
//! every service that obtained a [`ShutdownHandle`].
#![warn(missing_docs)]

mod controller;
mod service;

pub use self::controller::*;
pub use self::service::*;
