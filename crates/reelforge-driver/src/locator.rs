//! Locator strategies and the replaceable locator table.
//!
//! A role ("create_button", "title_input", ...) maps to an ordered list of
//! strategies. Lookup walks the list and takes the first strategy that
//! matches, so a table can carry a precise selector first and looser
//! fallbacks (aria label, visible text) after it.

use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::{BrowserSession, ElementHandle, ElementQuery};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Longest selector text accepted from configuration or a patch.
const MAX_SELECTOR_LEN: usize = 512;
/// Most strategies accepted for a single role.
const MAX_STRATEGIES_PER_ROLE: usize = 8;

// ── Roles ────────────────────────────────────────────────

pub const CREATE_BUTTON: &str = "create_button";
pub const UPLOAD_OPTION: &str = "upload_option";
pub const FILE_INPUT: &str = "file_input";
pub const TITLE_INPUT: &str = "title_input";
pub const DESCRIPTION_INPUT: &str = "description_input";
pub const NEXT_BUTTON: &str = "next_button";
pub const PUBLISH_BUTTON: &str = "publish_button";
pub const VIDEO_LINK: &str = "video_link";
pub const SAVE_BUTTON: &str = "save_button";
pub const SOURCE_TITLE: &str = "source_title";
pub const TRANSCRIPT_OPENER: &str = "transcript_opener";
pub const TRANSCRIPT: &str = "transcript";
pub const SOURCE_DESCRIPTION: &str = "source_description";

/// Roles the publish flow cannot run without. A table missing any of
/// these is rejected before it can replace the live one.
pub const REQUIRED_ROLES: [&str; 6] = [
    CREATE_BUTTON,
    UPLOAD_OPTION,
    FILE_INPUT,
    TITLE_INPUT,
    NEXT_BUTTON,
    PUBLISH_BUTTON,
];

/// One way of finding an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    XPath(String),
    /// Element whose normalized text contains `text`, optionally of one tag.
    Text { text: String, tag: Option<String> },
    AriaLabel(String),
    TestId(String),
}

impl Locator {
    pub fn css(s: &str) -> Self {
        Locator::Css(s.to_string())
    }

    /// The concrete query handed to the browser session.
    pub fn to_query(&self) -> ElementQuery {
        match self {
            Locator::Css(s) => ElementQuery::css(s.clone()),
            Locator::XPath(s) => ElementQuery::xpath(s.clone()),
            Locator::Text { text, tag } => {
                let tag = tag.as_deref().unwrap_or("*");
                ElementQuery::xpath(format!(
                    "//{tag}[contains(normalize-space(.), {})]",
                    xpath_literal(text)
                ))
            }
            Locator::AriaLabel(label) => {
                ElementQuery::css(format!("[aria-label=\"{}\"]", css_escape(label)))
            }
            Locator::TestId(id) => ElementQuery::css(format!("[data-testid=\"{}\"]", css_escape(id))),
        }
    }

    /// Parse one strategy. A bare string is a CSS selector; an object names
    /// its strategy: `{"css"}`, `{"xpath"}`, `{"text", "tag"?}`,
    /// `{"aria_label"}` or `{"test_id"}`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let locator = match value {
            Value::String(s) => Locator::Css(s.clone()),
            Value::Object(map) => {
                let field = |k: &str| map.get(k).and_then(|v| v.as_str()).map(str::to_string);
                if let Some(s) = field("css") {
                    Locator::Css(s)
                } else if let Some(s) = field("xpath") {
                    Locator::XPath(s)
                } else if let Some(s) = field("text") {
                    Locator::Text {
                        text: s,
                        tag: field("tag"),
                    }
                } else if let Some(s) = field("aria_label") {
                    Locator::AriaLabel(s)
                } else if let Some(s) = field("test_id") {
                    Locator::TestId(s)
                } else {
                    return Err(ForgeError::Sandbox(format!(
                        "unknown locator strategy: {value}"
                    )));
                }
            }
            other => {
                return Err(ForgeError::Sandbox(format!(
                    "locator must be a string or object, got {other}"
                )));
            }
        };
        locator.validate()?;
        Ok(locator)
    }

    pub fn to_json(&self) -> Value {
        match self {
            Locator::Css(s) => json!({ "css": s }),
            Locator::XPath(s) => json!({ "xpath": s }),
            Locator::Text { text, tag } => match tag {
                Some(tag) => json!({ "text": text, "tag": tag }),
                None => json!({ "text": text }),
            },
            Locator::AriaLabel(s) => json!({ "aria_label": s }),
            Locator::TestId(s) => json!({ "test_id": s }),
        }
    }

    fn expression(&self) -> &str {
        match self {
            Locator::Css(s) | Locator::XPath(s) | Locator::AriaLabel(s) | Locator::TestId(s) => s,
            Locator::Text { text, .. } => text,
        }
    }

    fn validate(&self) -> Result<()> {
        let expr = self.expression();
        if expr.trim().is_empty() {
            return Err(ForgeError::Sandbox("empty locator expression".into()));
        }
        if expr.len() > MAX_SELECTOR_LEN {
            return Err(ForgeError::Sandbox(format!(
                "locator expression longer than {MAX_SELECTOR_LEN} bytes"
            )));
        }
        if let Locator::Text { tag: Some(tag), .. } = self {
            if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(ForgeError::Sandbox(format!("invalid tag name '{tag}'")));
            }
        }
        Ok(())
    }
}

fn css_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// XPath 1.0 has no escape sequences; mixed quotes need `concat()`.
fn xpath_literal(s: &str) -> String {
    if !s.contains('"') {
        format!("\"{s}\"")
    } else if !s.contains('\'') {
        format!("'{s}'")
    } else {
        let parts: Vec<String> = s.split('"').map(|p| format!("\"{p}\"")).collect();
        format!("concat({})", parts.join(", '\"', "))
    }
}

/// Immutable map from role to ordered strategies. Never edited in place:
/// changes produce a new table that replaces the old one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocatorTable {
    roles: BTreeMap<String, Vec<Locator>>,
}

impl LocatorTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in table for the upload console and the source watch page.
    pub fn builtin() -> Self {
        let mut t = Self::empty();
        t.insert(
            CREATE_BUTTON,
            vec![
                Locator::css("#create-icon"),
                Locator::AriaLabel("Create".into()),
            ],
        );
        t.insert(
            UPLOAD_OPTION,
            vec![
                Locator::css("#text-item-0"),
                Locator::Text {
                    text: "Upload videos".into(),
                    tag: None,
                },
            ],
        );
        t.insert(FILE_INPUT, vec![Locator::css("input[type=\"file\"]")]);
        t.insert(
            TITLE_INPUT,
            vec![
                Locator::css(
                    "#textbox[aria-label=\"Add a title that describes your video (type @ to mention a channel)\"]",
                ),
                Locator::css("#title-textarea #textbox"),
            ],
        );
        t.insert(
            DESCRIPTION_INPUT,
            vec![Locator::css("#description-textarea #textbox")],
        );
        t.insert(NEXT_BUTTON, vec![Locator::css("#next-button")]);
        t.insert(
            PUBLISH_BUTTON,
            vec![
                Locator::css("#done-button"),
                Locator::Text {
                    text: "Publish".into(),
                    tag: Some("button".into()),
                },
            ],
        );
        t.insert(
            VIDEO_LINK,
            vec![Locator::css("a.style-scope.ytcp-video-info")],
        );
        t.insert(SAVE_BUTTON, vec![Locator::css("#save")]);
        t.insert(
            SOURCE_TITLE,
            vec![
                Locator::css("h1.ytd-watch-metadata yt-formatted-string"),
                Locator::css("#title h1"),
            ],
        );
        t.insert(
            TRANSCRIPT_OPENER,
            vec![Locator::AriaLabel("Show transcript".into())],
        );
        t.insert(
            TRANSCRIPT,
            vec![
                Locator::css("ytd-transcript-segment-list-renderer"),
                Locator::css("#segments-container"),
            ],
        );
        t.insert(
            SOURCE_DESCRIPTION,
            vec![Locator::css("#description-inline-expander")],
        );
        t
    }

    fn insert(&mut self, role: &str, locators: Vec<Locator>) {
        self.roles.insert(role.to_string(), locators);
    }

    pub fn get(&self, role: &str) -> &[Locator] {
        self.roles.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    /// A new table with every role in `patch` replacing the same role here.
    /// Roles absent from `patch` carry over unchanged.
    pub fn merged(&self, patch: &LocatorTable) -> Self {
        let mut roles = self.roles.clone();
        for (role, locators) in &patch.roles {
            roles.insert(role.clone(), locators.clone());
        }
        Self { roles }
    }

    /// Parse a table document: `{ role: locator | [locator, ...] }`.
    pub fn from_json(doc: &Value) -> Result<Self> {
        let map = doc
            .as_object()
            .ok_or_else(|| ForgeError::Sandbox("locator table must be a JSON object".into()))?;
        if map.is_empty() {
            return Err(ForgeError::Sandbox("locator table is empty".into()));
        }
        let mut table = Self::empty();
        for (role, value) in map {
            if role.trim().is_empty() {
                return Err(ForgeError::Sandbox("empty role name".into()));
            }
            let locators = match value {
                Value::Array(items) => items
                    .iter()
                    .map(Locator::from_json)
                    .collect::<Result<Vec<_>>>()?,
                single => vec![Locator::from_json(single)?],
            };
            if locators.is_empty() {
                return Err(ForgeError::Sandbox(format!("role '{role}' has no locators")));
            }
            if locators.len() > MAX_STRATEGIES_PER_ROLE {
                return Err(ForgeError::Sandbox(format!(
                    "role '{role}' has more than {MAX_STRATEGIES_PER_ROLE} locators"
                )));
            }
            table.roles.insert(role.clone(), locators);
        }
        Ok(table)
    }

    pub fn to_json(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .roles
            .iter()
            .map(|(role, locators)| {
                (
                    role.clone(),
                    Value::Array(locators.iter().map(Locator::to_json).collect()),
                )
            })
            .collect();
        Value::Object(map)
    }

    /// Shape check run before a table may go live.
    pub fn validate(&self) -> Result<()> {
        for role in REQUIRED_ROLES {
            if self.get(role).is_empty() {
                return Err(ForgeError::Sandbox(format!("required role '{role}' missing")));
            }
        }
        Ok(())
    }

    /// Try each strategy for `role` in order; first match wins.
    pub async fn locate(
        &self,
        session: &dyn BrowserSession,
        role: &str,
    ) -> Result<Option<ElementHandle>> {
        for locator in self.get(role) {
            let query = locator.to_query();
            if let Some(handle) = session.find(&query).await? {
                tracing::trace!("🎯 {role} matched {query}");
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    /// Like [`locate`](Self::locate), but a miss is a transient automation error.
    pub async fn require(&self, session: &dyn BrowserSession, role: &str) -> Result<ElementHandle> {
        self.locate(session, role).await?.ok_or_else(|| {
            ForgeError::TransientAutomation(format!(
                "no element for role '{role}' ({} strategies tried)",
                self.get(role).len()
            ))
        })
    }
}

/// The live table. Readers take an `Arc` snapshot; writers swap the whole `Arc`.
pub struct SharedLocatorTable {
    inner: RwLock<Arc<LocatorTable>>,
}

impl SharedLocatorTable {
    pub fn new(table: LocatorTable) -> Self {
        Self {
            inner: RwLock::new(Arc::new(table)),
        }
    }

    pub fn snapshot(&self) -> Arc<LocatorTable> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Validate and install `next`. The previous table stays live on error.
    pub fn replace(&self, next: LocatorTable) -> Result<()> {
        self.update(|_| Ok(next))
    }

    /// Derive the next table from the live one and install it, all under
    /// the write lock, so concurrent updates compose instead of overwriting
    /// each other. Nothing changes when `f` or validation fails.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&LocatorTable) -> Result<LocatorTable>,
    {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = f(&guard)?;
        next.validate()?;
        *guard = Arc::new(next);
        Ok(())
    }
}

/// Apply role → CSS overrides from configuration on top of `base`.
pub fn with_overrides(base: LocatorTable, overrides: &BTreeMap<String, String>) -> Result<LocatorTable> {
    if overrides.is_empty() {
        return Ok(base);
    }
    let doc: serde_json::Map<String, Value> = overrides
        .iter()
        .map(|(role, css)| (role.clone(), Value::String(css.clone())))
        .collect();
    let patch = LocatorTable::from_json(&Value::Object(doc))
        .map_err(|e| ForgeError::Config(format!("locator_overrides: {e}")))?;
    let table = base.merged(&patch);
    table
        .validate()
        .map_err(|e| ForgeError::Config(format!("locator_overrides: {e}")))?;
    Ok(table)
}
