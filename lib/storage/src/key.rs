use sha2::{Digest, Sha256};

/// Separator between key components; cannot occur inside a component
const SEP: char = '\0';

/// LMDB's default maximum key size
pub const MAX_KEY_LEN: usize = 511;

/// Longest vault or widget name stored as-is; longer names are stored as
/// their SHA-256
pub const MAX_SCOPE_COMPONENT: usize = 128;

/// Which logical table an entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Aggregates,
    Similar,
}

/// Natural key of a cache entry. Keys are content-addressed: the same
/// inputs always produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Aggregate {
        vault: String,
        widget: String,
        content_hash: String,
    },
    Similarity {
        vault: String,
        widget: String,
        source_path: String,
        content_version: String,
    },
}

impl CacheKey {
    pub fn aggregate(vault: &str, widget: &str, content_hash: &str) -> Self {
        CacheKey::Aggregate {
            vault: vault.to_string(),
            widget: widget.to_string(),
            content_hash: content_hash.to_string(),
        }
    }

    pub fn similarity(vault: &str, widget: &str, source_path: &str, content_version: &str) -> Self {
        CacheKey::Similarity {
            vault: vault.to_string(),
            widget: widget.to_string(),
            source_path: source_path.to_string(),
            content_version: content_version.to_string(),
        }
    }

    #[inline]
    #[must_use]
    pub fn vault(&self) -> &str {
        match self {
            CacheKey::Aggregate { vault, .. } | CacheKey::Similarity { vault, .. } => vault,
        }
    }

    #[inline]
    #[must_use]
    pub fn widget(&self) -> &str {
        match self {
            CacheKey::Aggregate { widget, .. } | CacheKey::Similarity { widget, .. } => widget,
        }
    }

    #[inline]
    #[must_use]
    pub fn table(&self) -> Table {
        match self {
            CacheKey::Aggregate { .. } => Table::Aggregates,
            CacheKey::Similarity { .. } => Table::Similar,
        }
    }

    /// Storage form: `vault \0 widget \0 rest...`, so every invalidation
    /// scope except "widget in any vault" is a key prefix. Over-long vault
    /// and widget names are stored as their SHA-256, and a tail that would
    /// push the key past [`MAX_KEY_LEN`] is replaced by its SHA-256.
    pub fn encode(&self) -> String {
        let tail = match self {
            CacheKey::Aggregate { content_hash, .. } => component(content_hash),
            CacheKey::Similarity {
                source_path,
                content_version,
                ..
            } => format!("{}{}{}", component(source_path), SEP, component(content_version)),
        };
        let prefix = scope_prefix(&[self.vault(), self.widget()]);
        if prefix.len() + tail.len() <= MAX_KEY_LEN {
            return prefix + &tail;
        }
        format!("{}#{:x}", prefix, Sha256::digest(tail.as_bytes()))
    }
}

/// Which entries an invalidation removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidateScope {
    /// Every entry of one collection
    Vault(String),
    /// One widget, in every collection
    Widget(String),
    /// One widget in one collection
    VaultWidget { vault: String, widget: String },
}

impl InvalidateScope {
    /// The collection this scope is confined to, if any
    #[must_use]
    pub fn vault(&self) -> Option<&str> {
        match self {
            InvalidateScope::Vault(vault) | InvalidateScope::VaultWidget { vault, .. } => Some(vault),
            InvalidateScope::Widget(_) => None,
        }
    }

    /// Encoded key prefix covering exactly this scope, when one exists
    #[must_use]
    pub fn prefix(&self) -> Option<String> {
        match self {
            InvalidateScope::Vault(vault) => Some(scope_prefix(&[vault])),
            InvalidateScope::VaultWidget { vault, widget } => Some(scope_prefix(&[vault, widget])),
            InvalidateScope::Widget(_) => None,
        }
    }

    /// Whether an encoded key falls in this scope
    pub fn matches(&self, encoded: &str) -> bool {
        match self {
            InvalidateScope::Widget(widget) => {
                let mut parts = encoded.split(SEP);
                parts.next();
                parts.next() == Some(scope_component(widget).as_str())
            }
            scoped => scoped
                .prefix()
                .map_or(false, |prefix| encoded.starts_with(&prefix)),
        }
    }
}

fn component(raw: &str) -> String {
    raw.replace(SEP, "\u{fffd}")
}

fn scope_component(raw: &str) -> String {
    if raw.len() > MAX_SCOPE_COMPONENT {
        return format!("#{:x}", Sha256::digest(raw.as_bytes()));
    }
    component(raw)
}

fn scope_prefix(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts {
        out.push_str(&scope_component(part));
        out.push(SEP);
    }
    out
}
