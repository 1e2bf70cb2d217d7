use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Shorten long ids for table cells: "abcdefgh...stuvwxyz"
pub fn truncate_id(id: &str) -> String {
    if id.chars().count() <= 16 {
        return id.to_string();
    }
    let head: String = id.chars().take(8).collect();
    let tail: String = id.chars().rev().take(8).collect::<Vec<_>>().into_iter().rev().collect();
    format!("{head}...{tail}")
}

/// Compact "time ago" string relative to `now`
/// Examples: "12s ago", "5m ago", "3h ago", "2d ago", "in 4m"
pub fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - ts).num_seconds();
    let (future, secs) = if secs < 0 { (true, -secs) } else { (false, secs) };
    let body = match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3_600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3_600),
        s => format!("{}d", s / 86_400),
    };
    if future {
        format!("in {body}")
    } else {
        format!("{body} ago")
    }
}

pub fn format_amount(amount: f64) -> String {
    if amount > 0.0 {
        format!("+{amount}")
    } else {
        format!("{amount}")
    }
}

/// 43 chars of base64url alphabet
pub fn is_arweave_id(s: &str) -> bool {
    s.len() == 43 && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// "0x" followed by 40 hex digits, any case
pub fn is_ethereum_address(s: &str) -> bool {
    s.len() == 42
        && (s.starts_with("0x") || s.starts_with("0X"))
        && s[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

pub fn is_entity_id(s: &str) -> bool {
    is_arweave_id(s) || is_ethereum_address(s)
}

/// Owner-query form of an address. Ethereum accounts sign with a key whose
/// Arweave-style owner is base64url(sha256(address bytes)); everything else
/// passes through untouched.
pub fn normalize_owner_address(addr: &str) -> String {
    if !is_ethereum_address(addr) {
        return addr.to_string();
    }
    let bytes: Vec<u8> = (2..addr.len())
        .step_by(2)
        .filter_map(|i| u8::from_str_radix(&addr[i..i + 2], 16).ok())
        .collect();
    URL_SAFE_NO_PAD.encode(Sha256::digest(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn truncates_only_long_ids() {
        assert_eq!(truncate_id("short"), "short");
        assert_eq!(
            truncate_id("abcdefgh0123456789stuvwxyz"),
            "abcdefgh...stuvwxyz"
        );
    }

    #[test]
    fn relative_times() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let ago = |s: i64| Utc.timestamp_opt(1_700_000_000 - s, 0).unwrap();
        assert_eq!(format_relative(ago(12), now), "12s ago");
        assert_eq!(format_relative(ago(300), now), "5m ago");
        assert_eq!(format_relative(ago(3 * 3_600), now), "3h ago");
        assert_eq!(format_relative(ago(2 * 86_400), now), "2d ago");
        assert_eq!(format_relative(ago(-240), now), "in 4m");
    }

    #[test]
    fn id_shapes() {
        let ar = "qNvAoz0TgcH7DMg8BCVn8jF32QH5L6T29VjHxhHqqGE";
        assert!(is_arweave_id(ar));
        assert!(!is_arweave_id(&ar[1..]));
        assert!(!is_arweave_id("qNvAoz0TgcH7DMg8BCVn8jF32QH5L6T29VjHxhHqq!E"));

        let eth = "0x52908400098527886E0F7030069857D2E4169EE7";
        assert!(is_ethereum_address(eth));
        assert!(!is_ethereum_address("0x5290"));
        assert!(is_entity_id(eth) && is_entity_id(ar));
    }

    #[test]
    fn owner_normalization() {
        let ar = "qNvAoz0TgcH7DMg8BCVn8jF32QH5L6T29VjHxhHqqGE";
        assert_eq!(normalize_owner_address(ar), ar);

        let eth = "0x52908400098527886E0F7030069857D2E4169EE7";
        let n = normalize_owner_address(eth);
        assert!(is_arweave_id(&n));
        // hex case does not change the bytes
        assert_eq!(n, normalize_owner_address(&eth.to_lowercase()));
    }
}
