//! Secret redaction applied to every log line before it reaches a durable or
//! visible sink.

/// Marker substituted for every occurrence of a registered secret value.
pub const REDACTION_MASK: &[u8] = b"<redacted>";

/// Replaces registered secret values in text with [`REDACTION_MASK`].
///
/// Built once per session from the secret environment variables that resolved
/// to a non-empty value. Read-only after construction, so it can be shared
/// freely across tasks.
#[derive(Debug, Default)]
pub struct SecretsRedactor {
    secrets: Vec<Vec<u8>>,
}

impl SecretsRedactor {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut secrets: Vec<Vec<u8>> = secrets
            .into_iter()
            .map(|secret| secret.into().into_bytes())
            .filter(|secret| !secret.is_empty())
            .collect();
        // Longest first, so a secret that contains another secret as a
        // substring is masked whole instead of leaving partial-match residue.
        secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        secrets.dedup();
        Self { secrets }
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Returns `data` with every literal secret occurrence replaced by the
    /// mask; bytes outside the replaced spans are untouched.
    pub fn redact(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        for secret in &self.secrets {
            out = replace_all(&out, secret, REDACTION_MASK);
        }
        out
    }

    pub fn redact_str(&self, text: &str) -> String {
        String::from_utf8_lossy(&self.redact(text.as_bytes())).into_owned()
    }
}

fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut index = 0;
    while index < haystack.len() {
        if haystack.len() - index >= needle.len()
            && &haystack[index..index + needle.len()] == needle
        {
            out.extend_from_slice(replacement);
            index += needle.len();
        } else {
            out.push(haystack[index]);
            index += 1;
        }
    }
    out
}
