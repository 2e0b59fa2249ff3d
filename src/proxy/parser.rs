//! Shadowsocks URI parser for subscription entries

use crate::error::ParseError;
use crate::proxy::decoder::decode_base64;
use crate::proxy::models::{ShadowsocksUri, SS_SCHEME};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// `host:port` or `[ipv6]:port`
static HOST_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\[([0-9A-Fa-f:.]+)\]|([^:/?#@\[\]\s]+)):(\d{1,5})$")
        .expect("Invalid host:port regex")
});

static METHOD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.-]*$").expect("Invalid method regex"));

/// Parser turning feed entries into Shadowsocks URIs
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single entry, returning `None` when it is not a usable proxy.
    ///
    /// Entries without the `ss://` prefix are expected noise and dropped
    /// quietly. Malformed `ss://` entries are logged and dropped.
    pub fn parse_line(line: &str) -> Option<ShadowsocksUri> {
        match Self::parse(line) {
            Ok(uri) => Some(uri),
            Err(ParseError::NotShadowsocks) => None,
            Err(e) => {
                warn!(entry = %line.trim(), error = %e, "Dropping malformed entry");
                None
            }
        }
    }

    /// Parse an entry into its canonical connection string
    pub fn canonical_url(line: &str) -> Option<String> {
        Self::parse_line(line).map(|uri| uri.connection_string())
    }

    /// Parse an entry.
    ///
    /// Supports formats:
    /// - ss://BASE64(method:password)@host:port[/?plugin=..][#tag]
    /// - ss://method:password@host:port (percent-encoded userinfo)
    /// - ss://BASE64(method:password@host:port)[#tag]
    pub fn parse(line: &str) -> Result<ShadowsocksUri, ParseError> {
        let line = line.trim();
        let body = line
            .strip_prefix(SS_SCHEME)
            .ok_or(ParseError::NotShadowsocks)?;

        let (body, tag) = match body.split_once('#') {
            Some((body, tag)) => (body, Some(tag)),
            None => (body, None),
        };

        let uri = match body.split_once('@') {
            Some((userinfo, rest)) => Self::parse_sip002(userinfo, rest)?,
            None => Self::parse_legacy(body)?,
        };

        match tag.map(urlencoding::decode) {
            Some(Ok(tag)) if !tag.is_empty() => Ok(uri.with_tag(tag.into_owned())),
            _ => Ok(uri),
        }
    }

    /// SIP002: userinfo is base64 or percent-encoded `method:password`
    fn parse_sip002(userinfo: &str, rest: &str) -> Result<ShadowsocksUri, ParseError> {
        let userinfo = urlencoding::decode(userinfo).map_err(ParseError::Percent)?;
        let credentials = if userinfo.contains(':') {
            userinfo.into_owned()
        } else {
            String::from_utf8(decode_base64(&userinfo)?)?
        };
        let (method, password) = Self::split_credentials(&credentials)?;

        let (authority, query) = match rest.find(&['/', '?'][..]) {
            Some(index) => (&rest[..index], Some(&rest[index..])),
            None => (rest, None),
        };
        let (host, port) = Self::parse_host_port(authority)?;

        let uri = ShadowsocksUri::new(method, password, host, port);
        match query.and_then(Self::plugin_param) {
            Some(plugin) => Ok(uri.with_plugin(plugin?)),
            None => Ok(uri),
        }
    }

    /// Legacy: the whole `method:password@host:port` is base64 encoded
    fn parse_legacy(body: &str) -> Result<ShadowsocksUri, ParseError> {
        let (encoded, query) = match body.split_once('?') {
            Some((encoded, query)) => (encoded, Some(query)),
            None => (body, None),
        };
        let encoded = match query {
            Some(_) => encoded.trim_end_matches('/'),
            None => encoded,
        };
        let decoded = String::from_utf8(decode_base64(encoded)?)?;

        let (credentials, authority) = decoded
            .rsplit_once('@')
            .ok_or(ParseError::MissingCredentials)?;
        let (method, password) = Self::split_credentials(credentials)?;
        let (host, port) = Self::parse_host_port(authority.trim())?;

        let uri = ShadowsocksUri::new(method, password, host, port);
        match query.and_then(Self::plugin_param) {
            Some(plugin) => Ok(uri.with_plugin(plugin?)),
            None => Ok(uri),
        }
    }

    fn split_credentials(credentials: &str) -> Result<(String, String), ParseError> {
        let (method, password) = credentials
            .split_once(':')
            .ok_or(ParseError::MissingCredentials)?;
        let method = method.trim().to_lowercase();
        if !METHOD_REGEX.is_match(&method) {
            return Err(ParseError::InvalidMethod(method));
        }
        Ok((method, password.to_string()))
    }

    fn parse_host_port(authority: &str) -> Result<(String, u16), ParseError> {
        let invalid = || ParseError::InvalidAddress(authority.to_string());
        let caps = HOST_PORT_REGEX.captures(authority).ok_or_else(invalid)?;

        let host = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
            .ok_or_else(invalid)?;
        let port: u16 = caps[3].parse().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }

        Ok((host, port))
    }

    /// Decoded `plugin` value from a `/?a=b&plugin=..` tail, if present
    fn plugin_param(query: &str) -> Option<Result<String, ParseError>> {
        query
            .trim_start_matches('/')
            .trim_start_matches('?')
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "plugin")
            .map(|(_, value)| {
                urlencoding::decode(value)
                    .map(|plugin| plugin.into_owned())
                    .map_err(ParseError::Percent)
            })
            .filter(|plugin| !matches!(plugin, Ok(p) if p.is_empty()))
    }
}
