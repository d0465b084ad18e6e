//! Command line arguments parsing.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use clap::Parser;
use std::net::{IpAddr, Ipv4Addr};

#[derive(Parser, Debug)]
pub struct Args {
    /// Our AS number
    pub local_as: u16,
    /// Our BGP router ID
    pub local_id: Ipv4Addr,
    /// Peer address to connect to, or to accept connections from
    pub peer_addr: IpAddr,
    /// Listen for an inbound connection instead of dialing out
    #[arg(short = 'L', long)]
    pub listen: bool,
    /// Listen address, used only with `--listen`
    #[arg(short = 'l', long, default_value = "::")]
    pub listen_addr: IpAddr,
    /// BGP session port, for either listening or dialing out
    #[arg(short = 'p', long, default_value = "179")]
    pub listen_port: u16,
    /// Hold Time to offer in the local OPEN
    #[arg(short = 't', long, default_value = "180")]
    pub hold_time: u16,
    /// Verbose mode
    #[arg(short = 'v', long)]
    pub verbose: bool,
}
