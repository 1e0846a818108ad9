#[macro_use]
extern crate log;

mod config;
mod db_meta;
mod discovery;
mod http_api;
mod http_util;
mod index;
mod logger;
mod navigation;
mod netif;
mod protocol;
mod query;
mod scan;
mod schema;
mod superscroll;
mod tags;

#[cfg(test)]
mod testutil;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::discovery::ServerIdentity;
use crate::index::IndexSource;
use crate::navigation::Navigator;
use crate::scan::Scanner;
use crate::superscroll::Superscroll;
use crate::tags::LoftyReader;

pub struct Streamium {
    music_root: PathBuf,
    web_port: u16,
    index_source: IndexSource,
    navigator: Navigator,
}

#[tokio::main]
async fn main() {
    let config = match Config::from_args() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logger::Logger::init(config.log_level) {
        eprintln!("can't set up logging: {}", e);
    }

    info!("streamiumd {}", env!("CARGO_PKG_VERSION"));

    if let Some(parent) = config.database.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!(
                "can't create directory '{}': {}",
                parent.to_string_lossy(),
                e
            );
            std::process::exit(1);
        }
    }

    let index_source = match IndexSource::create(config.database.clone()) {
        Ok(Some(s)) => s,
        Ok(None) => {
            error!("index database has an incompatible schema, exiting");
            std::process::exit(1);
        }
        Err(e) => {
            error!("can't open index: {}", e);
            std::process::exit(1);
        }
    };

    let scanner = Scanner::new(
        config.music_root.clone(),
        config.extensions.clone(),
        config.scan_concurrency,
        Arc::new(LoftyReader),
    );

    if let Err(e) = scanner.run(&index_source).await {
        error!("scan failed: {}", e);
        std::process::exit(1);
    }

    let superscroll = Arc::new(Superscroll::new());

    let identity = Arc::new(ServerIdentity {
        version: "1.0".to_string(),
        vendor_id: "MUSICMATCH".to_string(),
        name: config.name.clone(),
        short_name: config.short_name.clone(),
    });

    match netif::ipv4_interfaces() {
        Ok(interfaces) => {
            if interfaces.is_empty() {
                warn!("no usable network interfaces, devices won't find this server");
            }

            discovery::spawn_responders(
                interfaces,
                config.discovery_port,
                config.web_port,
                identity,
                superscroll.clone(),
            );
        }
        Err(e) => error!("can't list network interfaces: {}", e),
    }

    let streamium = Arc::new(Streamium {
        music_root: config.music_root.clone(),
        web_port: config.web_port,
        index_source,
        navigator: Navigator::new(superscroll),
    });

    let bind = SocketAddr::new(config.bind, config.web_port);

    tokio::select! {
        result = http_api::run_api(streamium, bind) => {
            if let Err(e) = result {
                error!("http server failed: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, exiting");
        }
    }
}
