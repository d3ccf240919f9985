//! Declarative extraction rules for share pages
//!
//! Each host that serves its file behind an HTML page gets an ordered table of
//! [`ExtractionRule`]s. Rules are tried in order and the first one yielding a usable
//! URL wins; adding or fixing a host means editing its table, not the control flow.

use crate::types::BackendKind;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use url::Url;

/// Post-processing applied to a captured value
pub type Normalizer = fn(&str, &Url) -> Option<String>;

/// One pattern-extraction rule
#[derive(Clone, Copy)]
pub struct ExtractionRule {
    /// Short name used in logs
    pub name: &'static str,
    /// Regular expression run against the page body
    pub pattern: &'static str,
    /// Capture group holding the URL
    pub group: usize,
    /// Turns the captured text into an absolute URL
    pub normalize: Normalizer,
}

impl std::fmt::Debug for ExtractionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionRule")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("group", &self.group)
            .finish()
    }
}

const MEDIAFIRE: &[ExtractionRule] = &[
    ExtractionRule {
        name: "mediafire-download-host",
        pattern: r#"href="(https?://download\d*\.mediafire\.com/[^"]+)""#,
        group: 1,
        normalize: absolute_url,
    },
    ExtractionRule {
        name: "mediafire-aria-label",
        pattern: r#"aria-label="Download file"\s+href="([^"]+)""#,
        group: 1,
        normalize: absolute_url,
    },
    ExtractionRule {
        name: "mediafire-download-button",
        pattern: r#"id="downloadButton"[^>]*?href="([^"]+)""#,
        group: 1,
        normalize: absolute_url,
    },
];

const WORKUPLOAD: &[ExtractionRule] = &[
    ExtractionRule {
        name: "workupload-dl-link",
        pattern: r#"href="((?:https?://workupload\.com)?/dl/[^"]+)""#,
        group: 1,
        normalize: absolute_url,
    },
    ExtractionRule {
        name: "workupload-start-link",
        pattern: r#"href="((?:https?://workupload\.com)?/start/[^"]+)""#,
        group: 1,
        normalize: absolute_url,
    },
    ExtractionRule {
        name: "workupload-json-url",
        pattern: r#""url"\s*:\s*"(https?:[^"]+)""#,
        group: 1,
        normalize: absolute_url,
    },
];

const KRAKENFILES: &[ExtractionRule] = &[
    ExtractionRule {
        name: "krakenfiles-download-link",
        pattern: r#"href="(https?://[a-z0-9.-]*krakenfiles\.com/(?:download|uploads)/[^"]+)""#,
        group: 1,
        normalize: absolute_url,
    },
    ExtractionRule {
        name: "krakenfiles-form-action",
        pattern: r#"<form[^>]*id="dl-form"[^>]*action="([^"]+)""#,
        group: 1,
        normalize: absolute_url,
    },
    ExtractionRule {
        name: "krakenfiles-json-url",
        pattern: r#""url"\s*:\s*"(https?:[^"]+)""#,
        group: 1,
        normalize: absolute_url,
    },
];

const ICEDRIVE: &[ExtractionRule] = &[
    ExtractionRule {
        name: "icedrive-json-download-url",
        pattern: r#""download_url"\s*:\s*"([^"]+)""#,
        group: 1,
        normalize: absolute_url,
    },
    ExtractionRule {
        name: "icedrive-download-link",
        pattern: r#"href="(https?://[^"]*icedrive\.(?:net|io)/[^"]*download[^"]*)""#,
        group: 1,
        normalize: absolute_url,
    },
];

const MAILRU: &[ExtractionRule] = &[ExtractionRule {
    name: "mailru-weblink-get",
    pattern: r#""weblink_get"\s*:\s*\[\s*\{[^\]]*?"url"\s*:\s*"([^"]+)""#,
    group: 1,
    normalize: mailru_url,
}];

const VK_DOC: &[ExtractionRule] = &[
    ExtractionRule {
        name: "vk-doc-url",
        pattern: r#""docUrl"\s*:\s*"([^"]+)""#,
        group: 1,
        normalize: absolute_url,
    },
    ExtractionRule {
        name: "vk-userapi-link",
        pattern: r#"(https?:(?:\\?/){2}[a-z0-9.-]*userapi\.com(?:\\?/)[^"'\s<>]+)"#,
        group: 1,
        normalize: absolute_url,
    },
];

/// Ordered rules for a backend (empty for backends that are not page-scraped)
pub fn rules_for(kind: BackendKind) -> &'static [ExtractionRule] {
    match kind {
        BackendKind::Mediafire => MEDIAFIRE,
        BackendKind::Workupload => WORKUPLOAD,
        BackendKind::Krakenfiles => KRAKENFILES,
        BackendKind::Icedrive => ICEDRIVE,
        BackendKind::Mailru => MAILRU,
        BackendKind::VkDoc => VK_DOC,
        _ => &[],
    }
}

/// Compile a fixed pattern, logging instead of panicking when it is invalid
pub(crate) fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .map_err(|e| tracing::error!(pattern, error = %e, "invalid built-in pattern"))
        .ok()
}

static COMPILED: LazyLock<HashMap<&'static str, Regex>> = LazyLock::new(|| {
    let mut compiled = HashMap::new();
    for kind in BackendKind::ALL {
        for rule in rules_for(kind) {
            match Regex::new(rule.pattern) {
                Ok(re) => {
                    compiled.insert(rule.pattern, re);
                }
                Err(e) => tracing::error!(rule = rule.name, error = %e, "invalid extraction rule"),
            }
        }
    }
    compiled
});

/// A URL produced by a rule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleMatch {
    /// Name of the rule that matched
    pub rule: &'static str,
    /// Normalized absolute URL
    pub url: String,
}

/// Run `rules` in order against `body`; the first normalized capture wins
pub fn apply_rules(rules: &[ExtractionRule], body: &str, page_url: &Url) -> Option<RuleMatch> {
    for rule in rules {
        let Some(re) = COMPILED.get(rule.pattern) else {
            continue;
        };
        for captures in re.captures_iter(body) {
            let Some(raw) = captures.get(rule.group) else {
                continue;
            };
            if let Some(url) = (rule.normalize)(raw.as_str(), page_url) {
                tracing::debug!(rule = rule.name, url = %url, "extraction rule matched");
                return Some(RuleMatch {
                    rule: rule.name,
                    url,
                });
            }
        }
    }
    None
}

/// Undo the escaping share pages apply to embedded URLs
///
/// Handles JSON slash escapes, `\uXXXX` escapes and the common HTML entities.
pub fn unescape(raw: &str) -> String {
    let mut text = raw.replace("\\/", "/");

    static UNICODE: LazyLock<Option<Regex>> =
        LazyLock::new(|| compile(r"\\u([0-9a-fA-F]{4})"));
    if let Some(re) = UNICODE.as_ref() {
        text = re
            .replace_all(&text, |caps: &regex::Captures| {
                u32::from_str_radix(&caps[1], 16)
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_default()
            })
            .into_owned();
    }

    static NUMERIC_ENTITY: LazyLock<Option<Regex>> =
        LazyLock::new(|| compile(r"&#(x[0-9a-fA-F]+|[0-9]+);"));
    if let Some(re) = NUMERIC_ENTITY.as_ref() {
        text = re
            .replace_all(&text, |caps: &regex::Captures| {
                let value = &caps[1];
                let code = match value.strip_prefix('x') {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => value.parse().ok(),
                };
                code.and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_default()
            })
            .into_owned();
    }

    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Unescape and resolve against the page URL; only http(s) results are accepted
pub fn absolute_url(raw: &str, page_url: &Url) -> Option<String> {
    let text = unescape(raw.trim());
    if text.is_empty() || text.starts_with('#') || text.starts_with("javascript:") {
        return None;
    }
    let url = page_url.join(&text).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

// Mail.ru serves a storage node base; the file lives under the share's public path.
fn mailru_url(raw: &str, page_url: &Url) -> Option<String> {
    let base = absolute_url(raw, page_url)?;
    let public = page_url.path().split_once("/public/")?.1.trim_matches('/');
    if public.is_empty() {
        return None;
    }
    Some(format!("{}/{}", base.trim_end_matches('/'), public))
}
