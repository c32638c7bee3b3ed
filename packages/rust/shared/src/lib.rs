//! Shared types, error model, and configuration for kbsync.
//!
//! This crate is the foundation depended on by all other kbsync crates.
//! It provides:
//! - [`KbSyncError`]: the unified error type
//! - Domain types ([`EntityDto`], [`CanonicalRecord`], [`CantonSet`], [`EntityType`])
//! - Configuration ([`AppConfig`], [`SyncSettings`], config loading)
//! - Text folding for name comparisons ([`text::fold`])

pub mod config;
pub mod error;
pub mod text;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EndpointConfig, EndpointSettings, EndpointsConfig, RegionConfig, StoreConfig,
    SyncConfig, SyncSettings, config_dir, config_file_path, database_path, init_config,
    load_config, load_config_from, render_config,
};
pub use error::{KbSyncError, Result};
pub use types::{
    CANTON_SCHEMA_VERSION, CanonicalRecord, Canton, CantonSet, Centroid, EntityAttributes,
    EntityDto, EntityType, Field, FieldStats, HeritageAttrs, HeritageCategory, ParkAttrs,
    PlazaAttrs, ProvinceAttrs, ProvinceRef, SourceKind,
};
