// logpulse/src/fingerprint.rs
//
// Log-to-fingerprint pipeline: templating + rhythm-hash composition.
//
// The template collapses the variable parts of a log body (UUIDs, IPv4
// literals, digit runs) to `*`, so "user 42 ok" and "user 9999 ok" land in
// the same equivalence class. The rhythm hash is a colon-delimited composite
// of fixed-width hex prefixes:
//
//   sha256(template)[:16] : sha256(service ":" severity)[:16] [ : semantic ]
//
// Pure, no I/O, stable across restarts for equal inputs.

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::embed;

/// Hex characters kept from each digest (8 bytes).
const SEGMENT_HEX: usize = 16;

// Replacement order matters: UUIDs contain digit runs, IPv4 quads contain
// digits. Collapse the most specific shape first.
fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
            .expect("uuid pattern")
    })
}

fn ipv4_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("ipv4 pattern")
    })
}

fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+\b").expect("digit pattern"))
}

/// Strip the variable tokens from a log body, yielding its template.
pub fn template(body: &str) -> String {
    let t = uuid_re().replace_all(body, "*");
    let t = ipv4_re().replace_all(&t, "*");
    digits_re().replace_all(&t, "*").into_owned()
}

fn digest_prefix(input: &str) -> String {
    let mut h = Sha256::new();
    h.update(input.as_bytes());
    hex::encode(&h.finalize()[..SEGMENT_HEX / 2])
}

/// Composes rhythm hashes. The semantic segment changes fingerprint
/// equivalence, so the toggle must be fixed per deployment.
#[derive(Debug, Clone, Copy)]
pub struct Fingerprinter {
    semantic: bool,
}

impl Fingerprinter {
    pub fn new(semantic: bool) -> Self {
        Self { semantic }
    }

    /// Composite fingerprint for one (service, severity, template) triple.
    pub fn rhythm_hash(&self, service: &str, severity: &str, template: &str) -> String {
        let template_seg   = digest_prefix(template);
        let structural_seg = digest_prefix(&format!("{}:{}", service, severity));

        if self.semantic {
            let semantic_seg = digest_prefix(&embed::sign_pattern(template));
            format!("{}:{}:{}", template_seg, structural_seg, semantic_seg)
        } else {
            format!("{}:{}", template_seg, structural_seg)
        }
    }

    /// Template + hash in one pass, as the ingestion path uses it.
    pub fn fingerprint(&self, service: &str, severity: &str, body: &str) -> (String, String) {
        let tpl  = template(body);
        let hash = self.rhythm_hash(service, severity, &tpl);
        (tpl, hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digits_collapse_to_star() {
        assert_eq!(template("user 42 ok"), "user * ok");
        assert_eq!(template("user 9999 ok"), "user * ok");
        assert_eq!(template("user 1 ok"), "user * ok");
    }

    #[test]
    fn uuid_and_ipv4_collapse() {
        let body = "req 550e8400-e29b-41d4-a716-446655440000 from 10.0.12.3 took 85 ms";
        assert_eq!(template(body), "req * from * took * ms");
    }

    #[test]
    fn template_is_idempotent() {
        let once  = template("conn 192.168.0.1 retry 3");
        let twice = template(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn equal_inputs_equal_fingerprints() {
        let fp = Fingerprinter::new(false);
        let a = fp.fingerprint("svc-a", "INFO", "user 42 ok").1;
        let b = fp.fingerprint("svc-a", "INFO", "user 9999 ok").1;
        let c = fp.fingerprint("svc-a", "INFO", "user 1 ok").1;
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn structural_segment_separates_services() {
        let fp = Fingerprinter::new(false);
        let a = fp.fingerprint("svc-a", "INFO", "user 42 ok").1;
        let b = fp.fingerprint("svc-b", "INFO", "user 42 ok").1;
        assert_ne!(a, b);
        // Same template segment, different structural segment.
        assert_eq!(a.split(':').next(), b.split(':').next());
    }

    #[test]
    fn segments_are_fixed_width_hex() {
        let fp   = Fingerprinter::new(false);
        let hash = fp.fingerprint("svc", "WARN", "disk 97 percent full").1;
        let segs: Vec<&str> = hash.split(':').collect();
        assert_eq!(segs.len(), 2);
        for seg in segs {
            assert_eq!(seg.len(), 16);
            assert!(seg.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn semantic_mode_appends_third_segment() {
        let fp   = Fingerprinter::new(true);
        let hash = fp.fingerprint("svc", "INFO", "user 42 ok").1;
        assert_eq!(hash.split(':').count(), 3);
        // Still deterministic.
        assert_eq!(hash, fp.fingerprint("svc", "INFO", "user 7 ok").1);
    }

    #[test]
    fn empty_body_yields_stable_fingerprint() {
        let fp = Fingerprinter::new(false);
        assert_eq!(
            fp.fingerprint("svc", "INFO", "").1,
            fp.fingerprint("svc", "INFO", "").1
        );
    }
}
