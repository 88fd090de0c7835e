//! capy-apps: desktop-entry model and application catalog.
//!
//! Provides:
//! - Desktop-entry parsing with locale-aware key resolution
//! - The application catalog that owns discovered entries and their
//!   running instances
//! - Exec field-code expansion
//! - XDG search-path helpers and application-id escaping

pub mod app_id;
pub mod catalog;
pub mod desktop_entry;
pub mod error;
pub mod field_codes;
pub mod locale;
pub mod paths;

pub use catalog::{
    AppCatalog, ApplicationRecord, AttachOutcome, CatalogEvent, InstanceRecord,
};
pub use desktop_entry::{DesktopEntry, EntryType, Group, ParseOutcome};
pub use error::AppsError;
pub use locale::Locale;
