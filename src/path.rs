//! Classifies a path string as local or remote and parses remote URIs.
//!
//! Grammar (RFC-free — this is the layer's own scheme, not a standard one):
//!
//! ```text
//! path      := "local://" rest
//!            | path-without-scheme-sep
//!            | protocol "://" options? host ":" port "/" unix-path
//! options   := "{" pair ("," pair)* "}"
//! pair      := key "=" value
//! ```

use crate::error::{Error, Result};

/// Result of classifying a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Local,
    Remote(RemoteUri),
}

/// A parsed remote URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUri {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub replica: u32,
    /// The remainder of the original path, starting at the first `/`
    /// after `host:port`. Always begins with `/`.
    pub unix_path: String,
}

const DEFAULT_REPLICA: u32 = 3;

impl RemoteUri {
    /// The `(protocol, host, port)` triple identifying this URI's
    /// connection-pool endpoint.
    pub fn endpoint(&self) -> (&str, &str, u16) {
        (&self.protocol, &self.host, self.port)
    }
}

/// Classifies `path` as local or remote.
pub fn classify(path: &str) -> Result<Classification> {
    if path.starts_with("local://") {
        return Ok(Classification::Local);
    }
    if !path.contains("://") {
        return Ok(Classification::Local);
    }
    parse_remote(path).map(Classification::Remote)
}

/// Converts a path to the back-end's native form. For local paths this is
/// the path unchanged; for remote paths it is [`RemoteUri::unix_path`].
pub fn convert_to_unix_path(path: &str) -> Result<String> {
    match classify(path)? {
        Classification::Local => Ok(path.to_owned()),
        Classification::Remote(uri) => Ok(uri.unix_path),
    }
}

fn parse_remote(path: &str) -> Result<RemoteUri> {
    let (protocol, rest) = path
        .split_once("://")
        .ok_or_else(|| Error::InvalidPath(path.to_owned()))?;
    if protocol.is_empty() {
        return Err(Error::InvalidPath(path.to_owned()));
    }

    let (replica, rest) = if let Some(body) = rest.strip_prefix('{') {
        let (options, after) = body
            .split_once('}')
            .ok_or_else(|| Error::InvalidPath(path.to_owned()))?;
        (parse_options(options, path)?, after)
    } else {
        (DEFAULT_REPLICA, rest)
    };

    let (host_port, unix_path) = split_host_port_from_path(rest, path)?;
    let (host, port_str) = host_port
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidPath(path.to_owned()))?;
    if host.is_empty() {
        return Err(Error::InvalidPath(path.to_owned()));
    }
    let port: u16 = port_str
        .parse()
        .map_err(|_| Error::InvalidPath(path.to_owned()))?;
    if port == 0 {
        return Err(Error::InvalidPath(path.to_owned()));
    }

    Ok(RemoteUri {
        protocol: protocol.to_owned(),
        host: host.to_owned(),
        port,
        replica,
        unix_path: unix_path.to_owned(),
    })
}

fn parse_options(options: &str, whole_path: &str) -> Result<u32> {
    let mut replica = DEFAULT_REPLICA;
    for pair in options.split(',').filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::InvalidPath(whole_path.to_owned()))?;
        if key == "replica" {
            replica = value
                .parse()
                .map_err(|_| Error::InvalidPath(whole_path.to_owned()))?;
        }
        // Unknown keys are accepted and ignored: forward compatibility
        // for collaborators that add options later.
    }
    Ok(replica)
}

/// Splits `rest` (everything after `://` and an optional options block)
/// into the `host:port` segment and the unix path that follows the first
/// `/` after it.
fn split_host_port_from_path<'a>(rest: &'a str, whole_path: &str) -> Result<(&'a str, &'a str)> {
    let slash = rest
        .find('/')
        .ok_or_else(|| Error::InvalidPath(whole_path.to_owned()))?;
    Ok((&rest[..slash], &rest[slash..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_scheme_is_local() {
        assert_eq!(classify("local:///var/data/1").unwrap(), Classification::Local);
    }

    #[test]
    fn bare_path_without_scheme_is_local() {
        assert_eq!(classify("/var/data/1").unwrap(), Classification::Local);
        assert_eq!(classify("relative/path").unwrap(), Classification::Local);
    }

    #[test]
    fn remote_without_options_defaults_replica() {
        let uri = match classify("hdfs://namenode:9000/base/1.dat").unwrap() {
            Classification::Remote(uri) => uri,
            _ => panic!("expected remote"),
        };
        assert_eq!(uri.protocol, "hdfs");
        assert_eq!(uri.host, "namenode");
        assert_eq!(uri.port, 9000);
        assert_eq!(uri.replica, DEFAULT_REPLICA);
        assert_eq!(uri.unix_path, "/base/1.dat");
    }

    #[test]
    fn remote_with_options_parses_replica() {
        let uri = match classify("hdfs://{replica=5}namenode:9000/base/1.dat").unwrap() {
            Classification::Remote(uri) => uri,
            _ => panic!("expected remote"),
        };
        assert_eq!(uri.replica, 5);
        assert_eq!(uri.host, "namenode");
    }

    #[test]
    fn unknown_options_are_ignored() {
        let uri = match classify("hdfs://{region=east,replica=2}h:1/p").unwrap() {
            Classification::Remote(uri) => uri,
            _ => panic!("expected remote"),
        };
        assert_eq!(uri.replica, 2);
    }

    #[test]
    fn missing_port_is_invalid() {
        assert!(classify("hdfs://namenode/base/1.dat").is_err());
    }

    #[test]
    fn port_out_of_range_is_invalid() {
        assert!(classify("hdfs://namenode:70000/base/1.dat").is_err());
    }

    #[test]
    fn port_zero_is_invalid() {
        assert!(classify("hdfs://namenode:0/base/1.dat").is_err());
    }

    #[test]
    fn missing_unix_path_is_invalid() {
        assert!(classify("hdfs://namenode:9000").is_err());
    }

    #[test]
    fn convert_to_unix_path_strips_endpoint() {
        assert_eq!(
            convert_to_unix_path("hdfs://h:9000/a/b.dat").unwrap(),
            "/a/b.dat"
        );
        assert_eq!(convert_to_unix_path("/a/b.dat").unwrap(), "/a/b.dat");
    }
}
