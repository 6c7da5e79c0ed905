mod transaction;
mod transaction_manager;
mod tx;

pub use transaction::{Transaction, TxLockMode, TxState};
pub use transaction_manager::TransactionManager;
pub use tx::{MemoryStore, MemoryTx, Tx};
