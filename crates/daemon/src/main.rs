// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use crate::args::Args;
use ::tracing::info;
use clap::Parser;
use eyre::{Report, eyre};
use mimalloc::MiMalloc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use vgdb_common::tracing;
use vgdb_daemon::{DataProvider, DataServer, MemoryCatalog, MessageHandler};

mod args;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<(), Report> {
    let args = Args::parse();

    tracing::init_tracing(args.debug).map_err(|e| eyre!("Unable to configure logging: {}", e))?;

    let config = args.load_config()?;
    info!(?config, "configuration loaded");

    let catalog = MemoryCatalog::from_file(&args.catalog)
        .map_err(|e| eyre!("Unable to load catalog {:?}: {}", args.catalog, e))?;
    let provider = Arc::new(DataProvider::new(Arc::new(catalog), config.provider));
    let handler = Arc::new(MessageHandler::new(provider));

    let kill_switch = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, kill_switch.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, kill_switch.clone())?;

    let server = DataServer::bind(args.listen.as_str(), handler, config.server, kill_switch)?;
    server.serve()?;

    info!("Done.");
    Ok(())
}
