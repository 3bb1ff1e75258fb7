use std::{net::SocketAddr, sync::Arc};

use clap::Parser;
use pm3p::{modbus::connection, poll::PollCoordinator, server, Result};
use tracing::info;

#[derive(Parser, Debug)]
#[clap(
    name = "pm3p",
    version,
    author,
    about = "Serves readings of a three-phase Modbus RTU power meter over HTTP"
)]
struct Cli {
    /// Serial device the meter bus is attached to
    #[clap(short, long, env = "PM3P_TTY", default_value = "/dev/ttyUSB0")]
    tty: String,

    #[clap(short, long, env = "PM3P_LISTEN", default_value = "0.0.0.0:80")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Cli::parse();

    info!(tty = %args.tty, "Using meter bus");
    let coordinator = Arc::new(PollCoordinator::new(connection::Config::new(args.tty)));

    server::run(
        args.listen,
        coordinator,
        server::shutdown_on(tokio::signal::ctrl_c()),
    )
    .await
}
