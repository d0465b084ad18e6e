//! Demo CLI: listen for (or dial) a single BGP peering and log its
//! progress through the FSM.
//!
//! Grounded in `delegation-feed/main.rs`'s `setup_logger`/`clap::Parser`
//! shape; the difference is that this binary does not speak to any
//! route database, it simply drives one `Connection` and logs what
//! happens, as a demonstration of the core crate rather than a feed.

// SPDX-License-Identifier: AGPL-3.0-or-later

mod arg;

use arg::Args;
use bgp_speaker::config::PeerConfig;
use bgp_speaker::connection::{Connection, Outcome};
use clap::Parser;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

fn setup_logger(level: log::LevelFilter) {
    let config = simplelog::ConfigBuilder::new()
        .set_time_format_rfc3339()
        .build();
    simplelog::TermLogger::init(
        level,
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .expect("Failed to initialize logger");
}

async fn drive(mut conn: Connection) {
    match conn.start().await {
        Ok(Outcome::Failed(Some(n))) => {
            log::error!("peering closed while opening: {n}");
            return;
        }
        Ok(_) => {}
        Err(e) => {
            log::error!("I/O error while opening: {e}");
            return;
        }
    }
    loop {
        match conn.drive().await {
            Ok(Outcome::Closed) => {
                log::info!("peering closed, final state {:?}", conn.state());
                break;
            }
            Ok(Outcome::Failed(notification)) => {
                log::warn!("peering failed: {notification:?}");
                break;
            }
            Ok(Outcome::CollisionCheck) => {
                // A single-connection demo has nothing to collide with;
                // let the FSM proceed as if it lost, i.e. keep running.
                continue;
            }
            Err(e) => {
                log::error!("I/O error while driving peering: {e}");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    setup_logger(if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });

    let mut config = PeerConfig::new(args.local_as, args.peer_addr);
    config.local_bgp_id = Some(args.local_id);
    config.hold_time = Duration::from_secs(u64::from(args.hold_time));

    if args.listen {
        let listener = TcpListener::bind((args.listen_addr, args.listen_port))
            .await
            .expect("failed to bind listen address");
        log::info!("listening on {}", listener.local_addr().unwrap());
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("accept failed: {e}");
                    continue;
                }
            };
            log::info!("accepted connection from {peer}");
            let config = config.clone();
            tokio::spawn(async move {
                match Connection::new(socket, &config) {
                    Ok(conn) => drive(conn).await,
                    Err(e) => log::error!("failed to wrap accepted socket: {e}"),
                }
            });
        }
    } else {
        let socket = TcpStream::connect((args.peer_addr, args.listen_port))
            .await
            .expect("failed to connect to peer");
        let conn = Connection::new(socket, &config).expect("failed to wrap connected socket");
        drive(conn).await;
    }
}
