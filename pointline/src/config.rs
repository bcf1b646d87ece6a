use std::net::SocketAddr;

use envconfig::Envconfig;
use tracing::Level;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:2878")]
    pub address: SocketAddr,

    #[envconfig(default = "127.0.0.1:3000")]
    pub admin_address: SocketAddr,

    #[envconfig(default = "true")]
    pub print_sink: bool,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    // Frames longer than this are dropped along with their connection
    #[envconfig(default = "32768")]
    pub max_line_length: usize,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "pointline")]
    pub otel_service_name: String,

    #[envconfig(default = "info")]
    pub log_level: Level,
}
