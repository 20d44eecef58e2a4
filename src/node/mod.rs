//! Cache Node Module
//!
//! A standalone replica process. It holds one full copy of the dataset and exposes a small
//! HTTP control surface that the master drives.
//!
//! ## Lifecycle
//! `booted -> serving -> shutting-down -> terminated`. A `POST /kill` enqueues a request on a
//! single-slot channel and answers immediately; the server then drains in-flight requests for
//! at most five seconds before it is dropped.
//!
//! ## Submodules
//! - **`server`**: Replica state, router construction and the shutdown/drain sequence.
//! - **`handlers`**: The axum handlers behind `/data`, `/dataVersion`, `/health`, `/notify`
//!   and `/kill`.

pub mod handlers;
pub mod server;
