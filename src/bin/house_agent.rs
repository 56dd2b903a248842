//! Runs a house strategy as an agent process.
//!
//! Usage: `house_agent <port> <house_name>`, where the port is the one the engine listens on.
//! The name `silent` connects and then never answers, to exercise reply deadlines.

use std::{
    env,
    net::{Ipv4Addr, TcpStream},
    thread,
    time::Duration,
};

use anyhow::Context;
use rpsls_league::{house, remote};

fn main() -> anyhow::Result<()> {
    let mut args = env::args().skip(1);
    let port: u16 = args
        .next()
        .context("missing port argument")?
        .parse()
        .context("port is not a number")?;
    let name = args.next().context("missing strategy name argument")?;

    if name == "silent" {
        let _stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))
            .with_context(|| format!("could not connect to engine on port {port}"))?;
        loop {
            thread::sleep(Duration::from_secs(60));
        }
    }

    remote::serve(house::by_name(&name)?, port)
}
