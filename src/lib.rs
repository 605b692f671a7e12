//! Identity schema and account-mutation data layer.
//!
//! Declares the persisted shape of user accounts, roles, and their
//! security artifacts (claims, logins, tokens) under a dedicated
//! `Identity` namespace, evolves that schema through named reversible
//! migration steps, and applies partial profile updates as atomic,
//! optimistically-concurrent row mutations.
//!
//! Authentication flows, password hashing, and hosting are external
//! collaborators; this crate is the narrow persistence and mutation
//! core they call into.
//!
//! ```no_run
//! use idhaven::{AccountService, IdentityConfig, IdentityStore};
//!
//! # async fn demo() -> Result<(), idhaven::IdentityError> {
//! let store = idhaven::store::open("sqlite://identity.db").await?;
//! let accounts = AccountService::new(store.clone(), IdentityConfig::default());
//!
//! let mut user = accounts.new_user("ada", Some("ada@example.com"));
//! store.create_user(&user).await?;
//! accounts
//!     .set_profile_fields(&mut user, Some("Ada"), Some("Lovelace"), Some("+1-555-0100"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod config;
pub mod entities;
pub mod error;
pub mod migrations;
pub mod prelude;
pub mod store;

pub use account::AccountService;
pub use config::IdentityConfig;
pub use entities::{ProfileImage, Role, User, UserProfile};
pub use error::IdentityError;
pub use store::{DynStore, IdentityStore};
