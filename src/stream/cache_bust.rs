//! URL rewriting for retry and reconnect requests.

use rand::Rng;

/// Name of the cache-busting query parameter.
const BUSTER: &str = "_";

/// `url` with its cache-busting parameter replaced by `_=<token>`.
///
/// Other query parameters and any fragment are kept as they are.
pub fn with_cache_buster(url: &str, token: &str) -> String {
    let (rest, fragment) = split_fragment(url);
    let (base, query) = rest.split_once('?').unwrap_or((rest, ""));

    let buster = format!("{BUSTER}={token}");
    let mut params: Vec<&str> = query
        .split('&')
        .filter(|p| !p.is_empty() && param_name(p) != BUSTER)
        .collect();
    params.push(&buster);

    let mut out = format!("{base}?{}", params.join("&"));
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// `url` reduced to scheme, authority and path, plus a fresh reconnect token
/// and the no-cache flags. A random `r` parameter defeats caches keyed on
/// the whole query.
pub fn reconnect_url(url: &str, token: &str) -> String {
    let base = match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        // Not every stream URL is parseable; fall back to plain splitting.
        Err(_) => {
            let (rest, _) = split_fragment(url);
            rest.split('?').next().unwrap_or(rest).to_string()
        }
    };
    let salt: u32 = rand::thread_rng().gen();
    format!("{base}?{BUSTER}={token}&forceReload=true&allowStale=false&nocache=true&r={salt:x}")
}

/// Millisecond timestamp token for plain retries.
pub fn timestamp_token() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

/// Timestamp plus random hex, for reconnects.
pub fn reconnect_token() -> String {
    let nonce: u64 = rand::thread_rng().gen();
    format!("{}_{nonce:x}", timestamp_token())
}

fn split_fragment(url: &str) -> (&str, Option<&str>) {
    match url.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (url, None),
    }
}

fn param_name(param: &str) -> &str {
    param.split('=').next().unwrap_or(param)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buster_appended_without_query() {
        assert_eq!(
            with_cache_buster("http://x/live/chan.m3u8", "123"),
            "http://x/live/chan.m3u8?_=123"
        );
    }

    #[test]
    fn test_buster_appended_to_existing_query() {
        assert_eq!(
            with_cache_buster("http://x/get.php?user=a&type=m3u", "9"),
            "http://x/get.php?user=a&type=m3u&_=9"
        );
    }

    #[test]
    fn test_buster_replaced_not_stacked() {
        let once = with_cache_buster("http://x/a.ts?token=t", "1");
        let twice = with_cache_buster(&once, "2");
        assert_eq!(twice, "http://x/a.ts?token=t&_=2");
    }

    #[test]
    fn test_buster_keeps_fragment() {
        assert_eq!(
            with_cache_buster("http://x/a.mp4#t=10", "5"),
            "http://x/a.mp4?_=5#t=10"
        );
    }

    #[test]
    fn test_reconnect_strips_query_and_fragment() {
        let url = reconnect_url("http://x/live/chan.m3u8?_=1&token=abc#frag", "77_ff");
        assert!(url.starts_with(
            "http://x/live/chan.m3u8?_=77_ff&forceReload=true&allowStale=false&nocache=true&r="
        ));
        assert!(!url.contains("token"));
        assert!(!url.contains('#'));
    }

    #[test]
    fn test_reconnect_unparseable_url() {
        let url = reconnect_url("chan.m3u8?old=1", "1_a");
        assert!(url.starts_with("chan.m3u8?_=1_a&forceReload=true&allowStale=false&nocache=true&r="));
    }

    #[test]
    fn test_reconnect_salt_differs() {
        let urls: Vec<_> = (0..4).map(|_| reconnect_url("http://x/a.ts", "1_a")).collect();
        assert!(urls.iter().any(|u| u != &urls[0]));
        let salt = urls[0].rsplit("&r=").next().unwrap();
        assert!(!salt.is_empty() && salt.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_are_fresh() {
        let a = reconnect_token();
        let b = reconnect_token();
        assert_ne!(a, b);
        assert!(a.contains('_'));
        assert!(timestamp_token().parse::<i64>().is_ok());
    }
}
