pub mod aicf;
pub mod beacon;
pub mod block;
pub mod chain;
pub mod config;
pub mod error;
pub mod executor;
pub mod fee_market;
pub mod limiter;
pub mod mempool;
pub mod notify;
pub mod rpc;
pub mod scheduler;
pub mod sequencer;
pub mod state;
pub mod transaction;
pub mod types;

pub use block::{Block, BlockHeader};
pub use chain::Chain;
pub use config::Config;
pub use error::CoreError;
pub use executor::{Executor, Receipt, Vm};
pub use mempool::{Admission, AdmissionError, Mempool};
pub use notify::EventBus;
pub use scheduler::OptimisticScheduler;
pub use state::{AccountState, StateStore};
pub use transaction::{FeeFields, Transaction};
pub use types::{Address, Hash32};

pub type Result<T> = std::result::Result<T, CoreError>;
