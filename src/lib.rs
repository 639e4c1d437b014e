//! Peer-to-peer call negotiation over a shared document store.
//!
//! Two peers exchange an offer, an answer and their ICE candidates through a
//! [`NegotiationStore`](store::NegotiationStore), then talk directly.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ssc_call::config::Settings;
//! use ssc_call::peer::{MediaSource, WebRtcEndpoint};
//! use ssc_call::store::MemoryStore;
//! use ssc_call::NegotiationCoordinator;
//!
//! # async fn run(camera: &dyn MediaSource) -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::from_env()?;
//! ssc_call::logger::init(&settings.logging);
//!
//! let endpoint = Arc::new(WebRtcEndpoint::new(&settings).await?);
//! let coordinator = NegotiationCoordinator::new(Arc::new(MemoryStore::new()), endpoint, &settings);
//! coordinator.open_local_media(camera).await?;
//! let call_id = coordinator.create_call().await?;
//! println!("join with {call_id}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod logger;
pub mod peer;
pub mod signaling;
pub mod store;
mod utils;

pub use errors::{CallError, CallResult};
pub use signaling::NegotiationCoordinator;
