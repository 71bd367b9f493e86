//! # atrium-core
//!
//! Core types, traits, and abstractions for the atrium collaboration backend.
//!
//! This crate provides the domain entities, the typed entity store façade,
//! the traits implemented by external collaborators (document store, object
//! store, knowledge base, notifications, workflow runs) and the shared error
//! taxonomy that other atrium crates depend on.

pub mod defaults;
pub mod entity;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use entity::{
    Document, Entity, EntityDescriptor, EntityKind, EntityQuery, EntityRegistry, EntityStore,
    FieldPredicate, SortDirection,
};
pub use error::{Error, Result};
pub use events::{
    Notification, NotificationEnvelope, NotificationEvent, NotificationHub, NotificationTarget,
};
pub use models::*;
pub use traits::*;
pub use uuid_utils::{new_entity_id, new_v7};
