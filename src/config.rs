use std::net::IpAddr;
use std::path::PathBuf;

use clap::{value_parser, Arg, ArgMatches, Command};

use crate::netif;

pub const DEFAULT_WEB_PORT: u16 = 42951;
pub const DEFAULT_DISCOVERY_PORT: u16 = 42591;
pub const DEFAULT_SCAN_CONCURRENCY: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub music_root: PathBuf,
    pub database: PathBuf,
    pub bind: IpAddr,
    pub web_port: u16,
    pub discovery_port: u16,
    pub name: String,
    pub short_name: String,
    pub extensions: Vec<String>,
    pub scan_concurrency: usize,
    pub log_level: log::LevelFilter,
}

pub fn command() -> Command {
    Command::new("streamiumd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Music server for Philips Streamium devices")
        .arg(
            Arg::new("music-root")
                .long("music-root")
                .value_name("DIR")
                .help("Directory holding the music library")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("database")
                .long("database")
                .value_name("FILE")
                .help("Index database")
                .default_value("~/.streamiumd/index.db"),
        )
        .arg(
            Arg::new("bind")
                .long("bind")
                .value_name("ADDRESS")
                .help("Address the web server listens on")
                .default_value("0.0.0.0")
                .value_parser(value_parser!(IpAddr)),
        )
        .arg(
            Arg::new("web-port")
                .long("web-port")
                .value_name("PORT")
                .default_value("42951")
                .value_parser(value_parser!(u16)),
        )
        .arg(
            Arg::new("discovery-port")
                .long("discovery-port")
                .value_name("PORT")
                .default_value("42591")
                .value_parser(value_parser!(u16)),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .value_name("NAME")
                .help("Server name shown on devices [default: local-<hostname>]"),
        )
        .arg(
            Arg::new("short-name")
                .long("short-name")
                .value_name("NAME")
                .help("Short server name [default: <hostname>]"),
        )
        .arg(
            Arg::new("extensions")
                .long("extensions")
                .value_name("LIST")
                .help("Comma separated list of file extensions to index")
                .default_value("mp3"),
        )
        .arg(
            Arg::new("scan-concurrency")
                .long("scan-concurrency")
                .value_name("N")
                .help("Maximum number of files read at once while scanning")
                .default_value("500")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .value_parser(["error", "warn", "info", "debug", "trace"]),
        )
}

impl Config {
    pub fn from_args() -> Result<Config, String> {
        Config::from_matches(&command().get_matches())
    }

    pub fn from_matches(matches: &ArgMatches) -> Result<Config, String> {
        let database = matches
            .get_one::<String>("database")
            .map(String::as_str)
            .unwrap_or("~/.streamiumd/index.db");
        let database = shellexpand::full(database)
            .map_err(|e| format!("invalid database path: {}", e))?;

        let log_level = matches
            .get_one::<String>("log-level")
            .map(String::as_str)
            .unwrap_or("info")
            .parse()
            .map_err(|_| "invalid log level".to_string())?;

        let hostname = netif::hostname().unwrap_or_else(|| "streamium".to_string());

        let extensions: Vec<String> = matches
            .get_one::<String>("extensions")
            .map(String::as_str)
            .unwrap_or("mp3")
            .split(',')
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        if extensions.is_empty() {
            return Err("no file extensions to index".to_string());
        }

        Ok(Config {
            music_root: matches
                .get_one::<PathBuf>("music-root")
                .cloned()
                .ok_or_else(|| "music root is required".to_string())?,
            database: PathBuf::from(database.as_ref()),
            bind: matches
                .get_one::<IpAddr>("bind")
                .copied()
                .unwrap_or_else(|| IpAddr::from([0, 0, 0, 0])),
            web_port: matches
                .get_one::<u16>("web-port")
                .copied()
                .unwrap_or(DEFAULT_WEB_PORT),
            discovery_port: matches
                .get_one::<u16>("discovery-port")
                .copied()
                .unwrap_or(DEFAULT_DISCOVERY_PORT),
            name: matches
                .get_one::<String>("name")
                .cloned()
                .unwrap_or_else(|| format!("local-{}", hostname)),
            short_name: matches
                .get_one::<String>("short-name")
                .cloned()
                .unwrap_or(hostname),
            extensions,
            scan_concurrency: matches
                .get_one::<usize>("scan-concurrency")
                .copied()
                .unwrap_or(DEFAULT_SCAN_CONCURRENCY),
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, String> {
        let matches = command()
            .try_get_matches_from(std::iter::once("streamiumd").chain(args.iter().copied()))
            .map_err(|e| e.to_string())?;
        Config::from_matches(&matches)
    }

    #[test]
    fn defaults() {
        let config = parse(&["--music-root", "/srv/music"]).unwrap();
        let hostname = netif::hostname().unwrap();

        assert_eq!(config.music_root, PathBuf::from("/srv/music"));
        assert!(config.database.ends_with(".streamiumd/index.db"));
        assert!(!config.database.starts_with("~"));
        assert_eq!(config.bind, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(config.web_port, 42951);
        assert_eq!(config.discovery_port, 42591);
        assert_eq!(config.name, format!("local-{}", hostname));
        assert_eq!(config.short_name, hostname);
        assert_eq!(config.extensions, vec!["mp3"]);
        assert_eq!(config.scan_concurrency, 500);
        assert_eq!(config.log_level, log::LevelFilter::Info);
    }

    #[test]
    fn overrides() {
        let config = parse(&[
            "--music-root",
            "/m",
            "--database",
            "/tmp/x.db",
            "--web-port",
            "8080",
            "--name",
            "Living room",
            "--extensions",
            "MP3, .flac",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(config.database, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.web_port, 8080);
        assert_eq!(config.name, "Living room");
        assert_eq!(config.extensions, vec!["mp3", "flac"]);
        assert_eq!(config.log_level, log::LevelFilter::Debug);
    }

    #[test]
    fn music_root_is_required() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--music-root", "/m", "--web-port", "notaport"]).is_err());
    }
}
