// Catalog acquisition and durable index
//
// The remote side of the catalog is an HTTP directory tree of per-basin
// inventory files; the durable side is a single PostgreSQL table keyed by
// (region, year, platform_id, cycle_number). The fetcher turns the remote
// listing into IndexEntry values; the store owns every mutation of the
// durable records.

pub mod fetcher;
pub mod memory;
pub mod store;

pub use fetcher::{CatalogClient, CatalogFetch};
pub use memory::MemoryCatalogStore;
pub use store::{CatalogStore, PgCatalogStore, StatusCounts};
