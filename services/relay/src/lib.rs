pub mod config;
pub mod error;
pub mod proxy;
pub mod reload;
pub mod routes_file;

pub use config::{Config, LogFormat};
pub use error::{Direction, RouteSourceError, SessionError};
pub use proxy::{
    extract_host, HeaderRegion, HeaderScanner, Listener, ListenerConfig, ListenerStats, Route,
    RoutingEntry, RoutingTable, Session, SessionId, SessionRegistry, SharedRoutingTable,
};
pub use reload::{run_reload_loop, ReloadSignal, RouteSource};
pub use routes_file::{RoutesFile, RoutesWatcher};
