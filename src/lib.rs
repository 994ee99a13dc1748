// Recetario - Core Library
// Exposes all modules for use in the admin CLI, the web server, and tests

pub mod db;
pub mod export;
pub mod filter;
pub mod normalizer;
pub mod sessions;

// Re-export commonly used types
pub use db::{
    category_totals, count_recetas, daily_breakdown, date_bounds, delete_lote,
    distinct_sucursales, fetch_raw_numbers, insert_recetas, list_lotes, load_csv, reassign_lote,
    sample_recetas, setup_database, CategoryTotals, DailyCount, LoteSummary, Receta,
};
pub use export::{build_export, Export, ExportKind};
pub use filter::{QueryPredicate, RecetaFilter};
pub use normalizer::{normalize, normalize_batch, Category};
pub use sessions::{
    create_session, create_user, destroy_session, purge_expired, session_user, verify_login,
    User, SESSION_TTL_DAYS,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
