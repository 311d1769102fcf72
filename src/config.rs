use std::path::PathBuf;
use std::sync::Arc;

/// Startup configuration. Fixed once the server starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    // Persistence
    pub dir: String,
    pub dbfilename: String,
    // Replication
    pub replicaof: Option<(String, u16)>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1".to_string(),
            port: 6379,
            dir: "./".to_string(),
            dbfilename: "dump.rdb".to_string(),
            replicaof: None,
        }
    }
}

impl Config {
    /// Build a config from `--flag value` pairs. Unknown flags and
    /// unparsable values are ignored.
    pub fn from_args(args: &[String]) -> Self {
        let mut config = Config::default();
        let mut i = 0;
        while i < args.len() {
            let value = args.get(i + 1);
            match (args[i].as_str(), value) {
                ("--port", Some(v)) => {
                    if let Ok(p) = v.parse() {
                        config.port = p;
                    }
                    i += 1;
                }
                ("--bind", Some(v)) => {
                    config.bind = v.clone();
                    i += 1;
                }
                ("--dir", Some(v)) => {
                    config.dir = v.clone();
                    i += 1;
                }
                ("--dbfilename", Some(v)) => {
                    config.dbfilename = v.clone();
                    i += 1;
                }
                ("--replicaof" | "--slaveof", Some(v)) => {
                    // Either one "host port" argument or two separate ones.
                    if let Some(addr) = parse_host_port(v) {
                        config.replicaof = Some(addr);
                        i += 1;
                    } else if let Some(port) = args.get(i + 2).and_then(|p| p.parse().ok()) {
                        config.replicaof = Some((v.clone(), port));
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        config
    }

    /// Answer `CONFIG GET <name>`.
    pub fn get(&self, key: &str) -> Option<String> {
        match key.to_lowercase().as_str() {
            "bind" => Some(self.bind.clone()),
            "port" => Some(self.port.to_string()),
            "dir" => Some(self.dir.clone()),
            "dbfilename" => Some(self.dbfilename.clone()),
            "replicaof" | "slaveof" => Some(
                self.replicaof
                    .as_ref()
                    .map(|(host, port)| format!("{host} {port}"))
                    .unwrap_or_default(),
            ),
            _ => None,
        }
    }

    /// Where the snapshot file is read from at startup.
    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(&self.dbfilename)
    }

    pub fn is_replica(&self) -> bool {
        self.replicaof.is_some()
    }
}

fn parse_host_port(s: &str) -> Option<(String, u16)> {
    let mut parts = s.split_whitespace();
    let host = parts.next()?;
    let port = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((host.to_string(), port))
}

pub type SharedConfig = Arc<Config>;

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &[&str]) -> Vec<String> {
        s.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_args(&[]);
        assert_eq!(config, Config::default());
        assert_eq!(config.port, 6379);
        assert_eq!(config.get("dir").as_deref(), Some("./"));
        assert_eq!(config.get("dbfilename").as_deref(), Some("dump.rdb"));
        assert!(!config.is_replica());
    }

    #[test]
    fn test_flags() {
        let config = Config::from_args(&args(&[
            "--port", "7000", "--dir", "/tmp/data", "--dbfilename", "x.rdb", "--verbose",
        ]));
        assert_eq!(config.port, 7000);
        assert_eq!(config.snapshot_path(), PathBuf::from("/tmp/data/x.rdb"));
        assert_eq!(config.get("DIR").as_deref(), Some("/tmp/data"));
        assert_eq!(config.get("maxmemory"), None);
    }

    #[test]
    fn test_replicaof_forms() {
        let quoted = Config::from_args(&args(&["--replicaof", "localhost 6379", "--port", "6380"]));
        assert_eq!(quoted.replicaof, Some(("localhost".to_string(), 6379)));
        assert_eq!(quoted.port, 6380);

        let split = Config::from_args(&args(&["--replicaof", "10.0.0.1", "7001", "--port", "7002"]));
        assert_eq!(split.replicaof, Some(("10.0.0.1".to_string(), 7001)));
        assert_eq!(split.port, 7002);
        assert!(split.is_replica());
    }
}
