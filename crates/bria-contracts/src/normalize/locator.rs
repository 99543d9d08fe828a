use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator<'a> {
    Remote(&'a str),
    Inline { mime: &'a str, payload: &'a str },
    Other(&'a str),
}

impl<'a> Locator<'a> {
    pub fn parse(raw: &'a str) -> Self {
        let trimmed = raw.trim();
        let lowered_prefix = trimmed
            .get(..8)
            .unwrap_or(trimmed)
            .to_ascii_lowercase();
        if lowered_prefix.starts_with("http://") || lowered_prefix.starts_with("https://") {
            return Locator::Remote(trimmed);
        }
        if let Some(rest) = trimmed.strip_prefix("data:") {
            if let Some((mime, payload)) = rest.split_once(";base64,") {
                return Locator::Inline { mime, payload };
            }
        }
        Locator::Other(trimmed)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Locator::Remote(_) => "remote",
            Locator::Inline { .. } => "inline",
            Locator::Other(_) => "other",
        }
    }

    pub fn decode(&self) -> Option<Vec<u8>> {
        match self {
            Locator::Inline { payload, .. } => BASE64.decode(payload.as_bytes()).ok(),
            _ => None,
        }
    }

    pub fn redacted(&self) -> String {
        match self {
            Locator::Remote(url) => (*url).to_string(),
            Locator::Inline { mime, payload } => {
                format!("data:{mime};base64,<omitted {} chars>", payload.len())
            }
            Locator::Other(raw) => (*raw).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Locator;

    #[test]
    fn parses_remote_and_inline_locators() {
        assert_eq!(
            Locator::parse("https://cdn.example.com/a.png"),
            Locator::Remote("https://cdn.example.com/a.png")
        );
        assert_eq!(
            Locator::parse("HTTP://example.com/b.png").kind(),
            "remote"
        );
        assert_eq!(
            Locator::parse("data:image/png;base64,AAAA"),
            Locator::Inline {
                mime: "image/png",
                payload: "AAAA"
            }
        );
        assert_eq!(Locator::parse("id.png"), Locator::Other("id.png"));
        assert_eq!(Locator::parse("data:text/plain,hi").kind(), "other");
    }

    #[test]
    fn inline_payload_decodes_and_redacts() {
        let locator = Locator::parse("data:image/png;base64,aGVsbG8=");
        assert_eq!(locator.decode(), Some(b"hello".to_vec()));
        assert_eq!(
            locator.redacted(),
            "data:image/png;base64,<omitted 8 chars>"
        );
        assert_eq!(Locator::parse("https://x/y.png").decode(), None);
    }
}
