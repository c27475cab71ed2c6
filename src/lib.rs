pub mod config;
pub mod fsm;
pub mod inst;
pub mod mgmt;
pub mod packet;
pub mod rib;
pub mod show;
pub mod task;

pub use config::{load_config, BgpConfig, LocalConfig, PeerConfig};
pub use inst::{Bgp, Message, ShowRequest};
pub use rib::Route;
pub use task::{Task, Timer, TimerType};
