pub mod block_store;
pub mod discovery;
pub mod name_client;
pub mod node_client;
pub mod node_service;
pub mod store_db;

pub use block_store::{BlockStore, BlockStoreConfig, NameNotifier};
pub use discovery::{EtcdAnnouncer, EtcdConfig};
pub use name_client::NameClient;
pub use node_client::NodeClient;
pub use node_service::NodeRpcHandler;
pub use store_db::{BlockRecord, NodeStoreDb};
