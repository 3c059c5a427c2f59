//! Launcher configuration (spec §6): the command-line surface for
//! `dispersy_node`, in the teacher's `structopt`-derive style.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use structopt::StructOpt;

/// One `key=value` pair from a repeated `--kargs` flag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeywordArg {
    pub key: String,
    pub value: String,
}

impl FromStr for KeywordArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((key, value)) => Ok(KeywordArg {
                key: key.to_string(),
                value: value.to_string(),
            }),
            None => Err(format!("expected key=value, got {:?}", s)),
        }
    }
}

/// Launcher configuration, parsed from the process's command line.
#[derive(Debug, StructOpt)]
#[structopt(name = "dispersy_node", about = "Runs a single Dispersy peer.")]
pub struct Config {
    /// Local address to bind the endpoint to.
    #[structopt(long, default_value = "0.0.0.0")]
    pub ip: IpAddr,

    /// Local UDP port to bind the endpoint to.
    #[structopt(long, default_value = "6421")]
    pub port: u16,

    /// Directory holding this peer's database and identity files.
    #[structopt(long, parse(from_os_str), default_value = ".")]
    pub workingdir: PathBuf,

    /// Path to the `sled` database file, relative to `workingdir` unless
    /// absolute.
    #[structopt(long, parse(from_os_str), default_value = "dispersy.db")]
    pub databasefile: PathBuf,

    /// Dotted path to the community implementation to load, e.g.
    /// `my_app::MyCommunity`.
    #[structopt(long)]
    pub community: String,

    /// Extra `key=value` arguments forwarded to the community's loader.
    #[structopt(long = "kargs")]
    pub kargs: Vec<KeywordArg>,

    /// Reject any message whose meta-message isn't already registered,
    /// instead of the default best-effort tolerance of unknown markers.
    #[structopt(long)]
    pub strict: bool,

    /// Log level when `RUST_LOG` isn't set.
    #[structopt(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parse from `std::env::args`.
    pub fn from_args_checked() -> Self {
        <Self as StructOpt>::from_args()
    }

    /// The resolved database path (`workingdir` joined with
    /// `databasefile`, unless the latter is already absolute).
    pub fn database_path(&self) -> PathBuf {
        if self.databasefile.is_absolute() {
            self.databasefile.clone()
        } else {
            self.workingdir.join(&self.databasefile)
        }
    }

    /// `kargs` collapsed into a map, last value wins on duplicate keys.
    pub fn kargs_map(&self) -> BTreeMap<String, String> {
        self.kargs.iter().map(|kv| (kv.key.clone(), kv.value.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kargs_parses_key_value_pairs() {
        let config = Config::from_iter(&[
            "dispersy_node",
            "--community",
            "demo::Demo",
            "--kargs",
            "role=seed",
            "--kargs",
            "weight=3",
        ]);
        let map = config.kargs_map();
        assert_eq!(map.get("role").map(String::as_str), Some("seed"));
        assert_eq!(map.get("weight").map(String::as_str), Some("3"));
    }

    #[test]
    fn database_path_joins_workingdir_unless_absolute() {
        let config = Config::from_iter(&[
            "dispersy_node",
            "--community",
            "demo::Demo",
            "--workingdir",
            "/var/dispersy",
        ]);
        assert_eq!(config.database_path(), PathBuf::from("/var/dispersy/dispersy.db"));
    }

    #[test]
    fn malformed_kwarg_is_rejected() {
        assert!(KeywordArg::from_str("no-equals-sign").is_err());
    }
}
