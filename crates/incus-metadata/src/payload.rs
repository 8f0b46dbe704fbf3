//! Multi-part assembly of user-data and vendor-data fragments
//!
//! When several sources contribute to the same canonical field they are
//! merged into one `multipart/mixed` document. Every part is labelled with
//! its source key and carries a `Merge-Type` header telling cloud-init how
//! to merge it with its siblings.
//!
//! The boundary is derived from the fragments themselves, so assembling the
//! same input twice yields byte-identical output.

use crate::config::FragmentPolicy;
use crate::error::{FragmentValidationError, Result};
use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Merge strategy announced on every part
pub const MERGE_TYPE: &str = "dict(recurse_array,recurse_str)+list(append)+str(append)";

/// Content subtype used when a fragment cannot be classified
const FALLBACK_SUBTYPE: &str = "plain";

/// Width of base64 lines in encoded parts
const BASE64_LINE_WIDTH: usize = 76;

/// Leading-bytes markers and the content kind they announce
const CONTENT_KINDS: &[(&str, &str)] = &[
    ("#include-once", "text/x-include-once-url"),
    ("#include", "text/x-include-url"),
    ("#!", "text/x-shellscript"),
    ("#cloud-config-archive", "text/cloud-config-archive"),
    ("#cloud-config-jsonp", "text/cloud-config-jsonp"),
    ("#cloud-config", "text/cloud-config"),
    ("#cloud-boothook", "text/cloud-boothook"),
    ("#part-handler", "text/part-handler"),
    ("## template: jinja", "text/jinja2"),
    ("content-type: multipart/", "multipart/mixed"),
];

/// Infer a content kind from the start of a payload
///
/// Case-insensitive and blind to leading whitespace; the longest matching
/// marker wins.
pub fn content_kind(payload: &str) -> Option<&'static str> {
    let head: String = payload
        .trim_start()
        .chars()
        .take(64)
        .flat_map(char::to_lowercase)
        .collect();
    CONTENT_KINDS
        .iter()
        .filter(|(marker, _)| head.starts_with(marker))
        .max_by_key(|(marker, _)| marker.len())
        .map(|(_, kind)| *kind)
}

/// One source contributing to a canonical field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFragment {
    /// Source key, used as the part's filename
    pub key: String,
    /// Raw fragment text
    pub text: String,
}

impl PayloadFragment {
    pub fn new(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            text: text.into(),
        }
    }
}

/// Serialized multi-part document plus any fragment issues seen on the way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositePayload {
    /// The `multipart/mixed` document
    pub document: String,
    /// Boundary separating the parts
    pub boundary: String,
    /// Fragments that could not be classified as text
    pub issues: Vec<FragmentValidationError>,
}

/// Merges fragments into composite payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadAssembler {
    policy: FragmentPolicy,
}

impl PayloadAssembler {
    pub fn new(policy: FragmentPolicy) -> Self {
        Self { policy }
    }

    /// Build one multi-part document from fragments, in input order
    pub fn assemble(&self, fragments: &[PayloadFragment]) -> Result<CompositePayload> {
        let mut issues = Vec::new();
        let mut parts = Vec::with_capacity(fragments.len());

        for fragment in fragments {
            let subtype = match content_kind(&fragment.text).and_then(|k| k.strip_prefix("text/")) {
                Some(subtype) => subtype,
                None => {
                    let issue = FragmentValidationError::new(&fragment.key, "invalid content type");
                    if self.policy == FragmentPolicy::Strict {
                        return Err(issue.into());
                    }
                    warn!(
                        key = %fragment.key,
                        kind = content_kind(&fragment.text).unwrap_or("unknown"),
                        "Fragment is not a text payload, emitting as text/plain"
                    );
                    issues.push(issue);
                    FALLBACK_SUBTYPE
                }
            };
            parts.push(render_part(fragment, subtype));
        }

        let boundary = boundary_for(&parts);
        let mut document =
            format!("Content-Type: multipart/mixed; boundary=\"{boundary}\"\nMIME-Version: 1.0\n\n");
        for part in &parts {
            document.push_str(&format!("--{boundary}\n{part}\n"));
        }
        document.push_str(&format!("--{boundary}--\n"));

        Ok(CompositePayload {
            document,
            boundary,
            issues,
        })
    }
}

/// Headers and encoded body of one part
fn render_part(fragment: &PayloadFragment, subtype: &str) -> String {
    let (encoding, body) = if fragment.text.is_ascii() {
        ("7bit", fragment.text.clone())
    } else {
        ("base64", encode_base64_lines(fragment.text.as_bytes()))
    };

    format!(
        "Content-Type: text/{subtype}; charset=\"utf-8\"\n\
         MIME-Version: 1.0\n\
         Content-Transfer-Encoding: {encoding}\n\
         Content-Disposition: attachment; filename=\"{key}\"\n\
         Merge-Type: {MERGE_TYPE}\n\
         \n\
         {body}",
        key = fragment.key,
    )
}

fn encode_base64_lines(bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    encoded
        .as_bytes()
        .chunks(BASE64_LINE_WIDTH)
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Content-derived boundary that does not occur in any part
fn boundary_for(parts: &[String]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let mut digest = hasher.finalize();

    loop {
        let hex: String = digest[..10].iter().map(|b| format!("{:02x}", b)).collect();
        let boundary = format!("==============={hex}==");
        if !parts.iter().any(|part| part.contains(&boundary)) {
            return boundary;
        }
        digest = Sha256::digest(digest);
    }
}
