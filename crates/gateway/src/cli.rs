use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "xymon-gateway", version, about = "HTTP gateway for the Xymon daemon protocol")]
pub(crate) struct Args {
    #[arg(long, default_value = "config/gateway.toml")]
    pub(crate) config: PathBuf,
    #[arg(long, default_value = "127.0.0.1:8081")]
    pub(crate) listen_addr: String,
    #[arg(long)]
    pub(crate) daemon_addr: Option<String>,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
}
