use std::collections::HashMap;

use hyper::header::HOST;
use hyper::{Body, Request};
use percent_encoding::percent_decode_str;

pub struct HttpQuery {
    params: HashMap<String, String>,
}

fn decode(value: &str) -> String {
    percent_decode_str(&value.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

impl HttpQuery {
    pub fn from(query: Option<&str>) -> HttpQuery {
        let mut params = HashMap::new();

        for pair in query.unwrap_or("").split('&') {
            if pair.is_empty() {
                continue;
            }

            let mut parts = pair.splitn(2, '=');
            let key = decode(parts.next().unwrap_or(""));
            let value = decode(parts.next().unwrap_or(""));

            params.entry(key).or_insert(value);
        }

        HttpQuery { params }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_str(key).and_then(|s| s.parse().ok())
    }
}

/// Host part of the `Host` header, without any port.
pub fn request_host(req: &Request<Body>) -> Option<String> {
    let host = req.headers().get(HOST)?.to_str().ok()?;

    let host = if host.starts_with('[') {
        // [v6]:port
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        host.split(':').next().unwrap_or(host)
    };

    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query() {
        let query = HttpQuery::from(Some("nodeid=104&name=A%20b+c&nodeid=5&flag"));

        assert_eq!(query.get_i64("nodeid"), Some(104));
        assert_eq!(query.get_str("name"), Some("A b c"));
        assert_eq!(query.get_str("flag"), Some(""));
        assert_eq!(query.get_i64("name"), None);
        assert_eq!(query.get_str("missing"), None);
        assert_eq!(HttpQuery::from(None).get_str("nodeid"), None);
    }

    #[test]
    fn strips_port_from_host() {
        let req = |host: &str| {
            Request::builder()
                .header(HOST, host)
                .body(Body::empty())
                .unwrap()
        };

        assert_eq!(request_host(&req("10.0.0.1:42951")).as_deref(), Some("10.0.0.1"));
        assert_eq!(request_host(&req("nas")).as_deref(), Some("nas"));
        assert_eq!(request_host(&req("[::1]:42951")).as_deref(), Some("[::1]"));
        assert_eq!(request_host(&Request::new(Body::empty())), None);
    }
}
