/// Database Module
///
/// The pool and everything around it, split by concern:
/// - **Connection boundary** (`connection.rs`): the traits a driver implements
/// - **SQLite driver** (`sqlite.rs`): the bundled `ConnectionFactory`
/// - **Pool** (`pool.rs`): bounded connection bookkeeping and checkout guards
/// - **Unit of work** (`unit_of_work.rs`): transactional execution on top of the pool
/// - **Rows** (`row.rs`): driver-independent values and result rows
/// - **Schema listing** (`schema.rs`): catalog queries through the executor
///
/// ## Error Handling
///
/// All operations use `PoolError`; unit-of-work failures use
/// `TransactionError`, which converts back into the primary `PoolError`.
pub mod connection;
pub mod pool;
pub mod row;
pub mod schema;
pub mod sqlite;
pub mod unit_of_work;

pub use connection::*;
pub use pool::*;
pub use row::*;
pub use sqlite::*;
pub use unit_of_work::*;
