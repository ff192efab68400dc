//! Cache Keys
//!
//! Deterministic composite keys over {user, folder scope, query, page
//! token}. The same logical query by the same user always yields the same
//! key; different users never share a key. Fields are joined with a unit
//! separator; separator and escape characters inside field values are
//! rewritten as reversible two-character sequences, so distinct logical
//! queries cannot collide.

const SEP: char = '\u{1f}';
/// Escape lead-in. `ESC s` encodes a separator, `ESC e` encodes a literal
/// escape character.
const ESC: char = '\u{fffd}';

fn escape_into(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            SEP => {
                out.push(ESC);
                out.push('s');
            }
            ESC => {
                out.push(ESC);
                out.push('e');
            }
            other => out.push(other),
        }
    }
}

fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != ESC {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(SEP),
            Some('e') => out.push(ESC),
            // Not produced by escape_into; keep the input as-is
            Some(other) => {
                out.push(ESC);
                out.push(other);
            }
            None => out.push(ESC),
        }
    }
    out
}

/// Composite key for one logical query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub user_id: String,
    pub parent_id: Option<String>,
    pub query: Option<String>,
    pub page_token: Option<String>,
}

impl CacheKey {
    /// Key for a plain folder listing.
    pub fn listing(user_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            parent_id: Some(parent_id.into()),
            query: None,
            page_token: None,
        }
    }

    /// Key for a search query, optionally scoped to a folder.
    pub fn search(
        user_id: impl Into<String>,
        parent_id: Option<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            parent_id,
            query: Some(query.into()),
            page_token: None,
        }
    }

    pub fn with_page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = Some(token.into());
        self
    }

    /// Non-first pages are not independently re-fetchable and are never
    /// cached.
    pub fn is_first_page(&self) -> bool {
        self.page_token.is_none()
    }

    /// Render the deterministic string form.
    pub fn generate(&self) -> String {
        let mut out = String::new();
        for (i, field) in [
            Some(self.user_id.as_str()),
            self.parent_id.as_deref(),
            self.query.as_deref(),
            self.page_token.as_deref(),
        ]
        .into_iter()
        .enumerate()
        {
            if i > 0 {
                out.push(SEP);
            }
            if let Some(value) = field {
                escape_into(value, &mut out);
            }
        }
        out
    }

    /// Parse a key back into its fields. Returns None for strings not
    /// produced by [`Self::generate`].
    pub fn parse(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split(SEP).collect();
        if parts.len() != 4 || parts[0].is_empty() {
            return None;
        }
        let opt = |s: &str| {
            if s.is_empty() {
                None
            } else {
                Some(unescape(s))
            }
        };
        Some(Self {
            user_id: unescape(parts[0]),
            parent_id: opt(parts[1]),
            query: opt(parts[2]),
            page_token: opt(parts[3]),
        })
    }

    /// Prefix matching every key belonging to a user.
    pub fn user_prefix(user_id: &str) -> String {
        let mut out = String::new();
        escape_into(user_id, &mut out);
        out.push(SEP);
        out
    }

    /// Prefix matching every key for a user within one folder scope.
    pub fn folder_prefix(user_id: &str, folder_id: &str) -> String {
        let mut out = Self::user_prefix(user_id);
        escape_into(folder_id, &mut out);
        out.push(SEP);
        out
    }
}
