//! Actor authorization levels
//!
//! Permissions are a static snapshot loaded once at startup:
//!
//! ```json
//! { "admins": ["alice"], "users": { "bob": { "level": 2 } } }
//! ```
//!
//! Admins are always level 99. Listed users get their recorded level
//! (default 1). Everyone else is a guest at level 0.

pub mod store;

pub use store::{LoadStatus, PermissionError, PermissionSnapshot, PermissionStore, UserRecord};

/// Authorization rank of an actor
pub type Level = u32;

/// Unknown actors
pub const GUEST: Level = 0;

/// Listed users without an explicit level
pub const USER: Level = 1;

/// Members of `admins`
pub const ADMIN: Level = 99;
