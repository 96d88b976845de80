pub mod client;
pub mod controller;
pub mod reconciler;

pub use client::{HttpRemote, RemoteSync};
pub use controller::SyncController;
pub use reconciler::{SyncReconciler, SyncReport};
