//! Database dispatch macros for reducing code duplication.
//!
//! The pool and transaction wrappers are enums with one variant per dialect.
//! These macros expand to the `match` that forwards to the per-dialect code,
//! so each call site stays linear.

/// Macro for generating dispatch match arms over `DbPool` variants.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     SQLite(p) => do_sqlite(p),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

/// Same as [`impl_db_dispatch`], over `DbTransaction` variants.
#[macro_export]
macro_rules! impl_tx_dispatch {
    ($tx:expr, { $($variant:ident($t:ident) => $body:expr),+ $(,)? }) => {
        match $tx {
            $(
                $crate::db::transaction::DbTransaction::$variant($t) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
pub use impl_tx_dispatch;
