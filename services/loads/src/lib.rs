//! Haulbook Loads Service
//!
//! Lifecycle rules for freight load records: how bulk-import rows become
//! canonical loads, how photo fields are validated before persistence, how
//! fuel and revenue figures are derived for a driver, and when loads are
//! archived or purged.
//!
//! ## Features
//!
//! - **Import Normalization**: Loosely shaped rows resolved through ordered
//!   alias chains into canonical records, never failing on malformed values
//! - **Photo Sanitization**: HTTPS/image/length/count filters with a field
//!   quota report
//! - **Fuel Analytics**: Fuel cost and net revenue per load, memoized through
//!   a TTL cache
//! - **Archival Sweeps**: Status + 7-day window archival, idempotent across
//!   runs, with a separate purge of long-archived loads
//!
//! ## Architecture
//!
//! ```text
//!  Import rows          Photo writes          Analytics reads
//!       │                    │                      │
//!       ▼                    ▼                      ▼
//! ┌──────────────┐   ┌──────────────┐       ┌──────────────┐    ┌──────────┐
//! │ Normalizer   │   │ Photo        │       │ Analytics    │───▶│ TTL      │
//! │              │   │ Sanitizer    │       │ Service      │    │ Cache    │
//! └──────────────┘   └──────────────┘       └──────────────┘    └──────────┘
//!       │                    │                      ▲
//!       ▼                    ▼                      │
//! ┌─────────────────────────────────────────────────────────┐
//! │                      Load Store                         │
//! └─────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ scheduled / triggered sweeps
//!                     ┌──────────────┐     ┌──────────────┐
//!                     │ Archival     │────▶│ Activity     │
//!                     │ Service      │     │ Log          │
//!                     └──────────────┘     └──────────────┘
//! ```

pub mod activity_log;
pub mod analytics;
pub mod api;
pub mod archival;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod normalizer;
pub mod photos;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use activity_log::{ActivityEntry, ActivityLog};
pub use analytics::{compute, AnalyticsResult, AnalyticsService, FuelAnalyticsInput, FuelPrices, PriceOverrides};
pub use api::{create_router, AppState};
pub use archival::{ArchivalEngine, ArchivalService, ArchiveDecision, PurgeReport, SweepReport};
pub use cache::{CacheEntry, CacheLookup, KvStore, MemoryKvStore, TtlCache};
pub use config::Config;
pub use error::{CacheError, LoadError, LoadResult};
pub use model::{DriverFuelProfile, FuelType, LoadRecord, LoadStatus, Location};
pub use normalizer::{normalize, normalize_batch, RawRow};
pub use photos::{PhotoReport, PhotoSanitizer};
pub use store::{shared_pg_store, LoadStore, MemoryLoadStore, PgKvStore, PgLoadStore};
