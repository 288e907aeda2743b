//! Transaction and networking metrics (§4.8).

pub mod networking;
pub mod transaction;

pub use networking::NetworkingStats;
pub use transaction::TransactionStats;
