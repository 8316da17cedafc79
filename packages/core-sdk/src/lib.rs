pub mod analyze;
pub mod catalog;
pub mod chat;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod server;
pub mod telemetry;

/**
 * \brief SDK preludes for the common modules callers reach for.
 */
pub mod prelude {
    pub use crate::analyze;
    pub use crate::catalog;
    pub use crate::chat;
    pub use crate::db;
    pub use crate::error;
    pub use crate::llm;
    pub use crate::models;
    pub use crate::server;
    pub use crate::telemetry;
}
