use crate::content::{MediaKind, SequenceContent};

/// Cache identity of a carousel draft.
///
/// Two contents with the same fingerprint are treated as identical by every
/// cache tier, so the digest covers the full normalized content: name, card
/// count, trimmed card text, and media references including their
/// canonicalized parameter objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub hi: u64,
    pub lo: u64,
}

impl Fingerprint {
    pub fn to_hex(self) -> String {
        format!("{:016x}{:016x}", self.hi, self.lo)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub fn fingerprint_content(content: &SequenceContent) -> Fingerprint {
    let mut a = Fnv1a64::new(0xcbf29ce484222325);
    let mut b = Fnv1a64::new(0x9ae16a3b2f90404f);

    write_str_pair(&mut a, &mut b, content.name.trim());
    write_u64_pair(&mut a, &mut b, content.cards.len() as u64);
    for card in &content.cards {
        write_str_pair(&mut a, &mut b, card.title.trim());
        write_str_pair(&mut a, &mut b, card.body.trim());
        match &card.media {
            Some(media) => {
                write_u8_pair(&mut a, &mut b, 1);
                write_str_pair(&mut a, &mut b, &media.url);
                write_u8_pair(
                    &mut a,
                    &mut b,
                    match media.kind {
                        MediaKind::Image => 0,
                        MediaKind::Video => 1,
                    },
                );
                write_json_value_pair(&mut a, &mut b, &media.params);
            }
            None => write_u8_pair(&mut a, &mut b, 0),
        }
    }

    Fingerprint {
        hi: a.finish(),
        lo: b.finish(),
    }
}

fn write_json_value_pair(a: &mut Fnv1a64, b: &mut Fnv1a64, v: &serde_json::Value) {
    match v {
        serde_json::Value::Null => write_u8_pair(a, b, 0),
        serde_json::Value::Bool(x) => {
            write_u8_pair(a, b, 1);
            write_u8_pair(a, b, u8::from(*x));
        }
        serde_json::Value::Number(n) => {
            write_u8_pair(a, b, 2);
            write_str_pair(a, b, &n.to_string());
        }
        serde_json::Value::String(s) => {
            write_u8_pair(a, b, 3);
            write_str_pair(a, b, s);
        }
        serde_json::Value::Array(items) => {
            write_u8_pair(a, b, 4);
            write_u64_pair(a, b, items.len() as u64);
            for item in items {
                write_json_value_pair(a, b, item);
            }
        }
        serde_json::Value::Object(map) => {
            write_u8_pair(a, b, 5);
            let mut keys = map.keys().cloned().collect::<Vec<_>>();
            keys.sort();
            write_u64_pair(a, b, keys.len() as u64);
            for k in keys {
                write_str_pair(a, b, &k);
                write_json_value_pair(a, b, &map[&k]);
            }
        }
    }
}

fn write_u8_pair(a: &mut Fnv1a64, b: &mut Fnv1a64, v: u8) {
    a.write_u8(v);
    b.write_u8(v);
}

fn write_u64_pair(a: &mut Fnv1a64, b: &mut Fnv1a64, v: u64) {
    a.write_u64(v);
    b.write_u64(v);
}

fn write_str_pair(a: &mut Fnv1a64, b: &mut Fnv1a64, s: &str) {
    write_u64_pair(a, b, s.len() as u64);
    a.write_bytes(s.as_bytes());
    b.write_bytes(s.as_bytes());
}

#[derive(Clone, Copy)]
struct Fnv1a64(u64);

impl Fnv1a64 {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        let mut h = self.0;
        for &b in bytes {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        self.0 = h;
    }

    fn finish(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{CardContent, MediaRef};

    fn content_with_body(body: &str) -> SequenceContent {
        SequenceContent {
            name: "promo".to_string(),
            cards: vec![CardContent {
                title: "hello".to_string(),
                body: body.to_string(),
                media: Some(MediaRef {
                    url: "blob://img-1".to_string(),
                    kind: MediaKind::Image,
                    params: serde_json::json!({ "crop": "16:9" }),
                }),
            }],
        }
    }

    #[test]
    fn fingerprint_is_deterministic_for_same_content() {
        let content = content_with_body("offer ends friday");
        assert_eq!(fingerprint_content(&content), fingerprint_content(&content));
    }

    #[test]
    fn fingerprint_changes_when_text_changes() {
        let a = content_with_body("offer ends friday");
        let b = content_with_body("offer ends tuesday");
        assert_ne!(fingerprint_content(&a), fingerprint_content(&b));
    }

    #[test]
    fn same_length_different_text_does_not_collide() {
        // Lengths and counts match exactly; only the bytes differ.
        let a = content_with_body("aaaa");
        let b = content_with_body("bbbb");
        assert_ne!(fingerprint_content(&a), fingerprint_content(&b));
    }

    #[test]
    fn surrounding_whitespace_is_normalized_away() {
        let a = content_with_body("offer");
        let b = content_with_body("  offer  ");
        assert_eq!(fingerprint_content(&a), fingerprint_content(&b));
    }

    #[test]
    fn json_param_key_order_is_canonical() {
        let mut a = content_with_body("x");
        let mut b = content_with_body("x");
        a.cards[0].media.as_mut().unwrap().params =
            serde_json::json!({ "crop": "16:9", "focus": "center" });
        b.cards[0].media.as_mut().unwrap().params =
            serde_json::json!({ "focus": "center", "crop": "16:9" });
        assert_eq!(fingerprint_content(&a), fingerprint_content(&b));
    }
}
