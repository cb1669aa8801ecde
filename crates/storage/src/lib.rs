pub mod error;
pub mod postgres;
pub mod records;
pub mod sink;

pub use error::PersistenceError;
pub use postgres::PgAlertSink;
pub use records::load_records;
pub use sink::{persist, AlertQuery, AlertRow, AlertSink, MemorySink, StoredAlert};
