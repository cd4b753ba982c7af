//! CLI command implementations

mod config;
mod devices;
mod info;
mod pair;
mod proxy;

pub use config::{config_init, config_path, config_show, load_link_config};
pub use devices::devices_command;
pub use info::{info_command, recovery_command};
pub use pair::{pair_record_command, PairRecordSummary};
pub use proxy::{debugserver_command, proxy_command};
