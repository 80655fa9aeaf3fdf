//! Shared types for talking to a server and holding what it advertised.

use std::collections::HashMap;
use std::fmt;

use rust_mcp_schema::ServerCapabilities;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How to launch the server. Stdio only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl LaunchSpec {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
        }
    }

    /// Command line as typed, for logs and diagnostics.
    pub fn display(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Kind of definition a server can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Tool,
    Prompt,
    Resource,
    Template,
}

impl Category {
    /// Enumeration and report order.
    pub const ALL: [Category; 4] = [
        Category::Tool,
        Category::Prompt,
        Category::Resource,
        Category::Template,
    ];

    /// Lowercase plural, used in warnings and report headings.
    pub fn label(self) -> &'static str {
        match self {
            Category::Tool => "tools",
            Category::Prompt => "prompts",
            Category::Resource => "resources",
            Category::Template => "templates",
        }
    }

    /// Singular `type` value in the JSON report.
    pub fn type_name(self) -> &'static str {
        match self {
            Category::Tool => "tool",
            Category::Prompt => "prompt",
            Category::Resource => "resource",
            Category::Template => "template",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Category::Tool => "Tools",
            Category::Prompt => "Prompts",
            Category::Resource => "Resources",
            Category::Template => "Templates",
        }
    }

    pub fn list_method(self) -> &'static str {
        match self {
            Category::Tool => "tools/list",
            Category::Prompt => "prompts/list",
            Category::Resource => "resources/list",
            Category::Template => "resources/templates/list",
        }
    }

    /// Key holding the item array in a list result.
    pub fn result_key(self) -> &'static str {
        match self {
            Category::Tool => "tools",
            Category::Prompt => "prompts",
            Category::Resource => "resources",
            Category::Template => "resourceTemplates",
        }
    }

    /// Capability that gates this category.
    pub fn capability(self) -> Capability {
        match self {
            Category::Tool => Capability::Tools,
            Category::Prompt => Capability::Prompts,
            Category::Resource | Category::Template => Capability::Resources,
        }
    }

    /// Whether a listing failure aborts the whole run.
    pub fn is_load_bearing(self) -> bool {
        matches!(self, Category::Tool | Category::Prompt)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Tools,
    Prompts,
    Resources,
}

impl Capability {
    fn bit(self) -> u8 {
        match self {
            Capability::Tools => 1,
            Capability::Prompts => 1 << 1,
            Capability::Resources => 1 << 2,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Capability::Tools => "tools",
            Capability::Prompts => "prompts",
            Capability::Resources => "resources",
        }
    }
}

/// Capability flags a server declared at handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);

    pub fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap.bit())
    }

    pub fn contains(self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// Whether `category` should be enumerated at all.
    pub fn admits(self, category: Category) -> bool {
        self.contains(category.capability())
    }

    /// Presence-based reading of a raw capabilities object, for servers
    /// whose declaration does not fit the typed schema.
    pub fn from_raw(raw: &Value) -> Self {
        [Capability::Tools, Capability::Prompts, Capability::Resources]
            .into_iter()
            .filter(|cap| raw.get(cap.key()).is_some_and(|v| !v.is_null()))
            .fold(Self::NONE, Self::with)
    }
}

impl From<&ServerCapabilities> for Capabilities {
    fn from(caps: &ServerCapabilities) -> Self {
        let mut out = Self::NONE;
        if caps.tools.is_some() {
            out = out.with(Capability::Tools);
        }
        if caps.prompts.is_some() {
            out = out.with(Capability::Prompts);
        }
        if caps.resources.is_some() {
            out = out.with(Capability::Resources);
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// One advertised item, already rendered to the text that gets tokenized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub category: Category,
    pub name: String,
    pub canonical_text: String,
}

/// Everything fetched from one server run, in emission order per category.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub server: ServerInfo,
    pub tools: Vec<Definition>,
    pub prompts: Vec<Definition>,
    pub resources: Vec<Definition>,
    pub templates: Vec<Definition>,
    pub warnings: Vec<String>,
}

impl FetchResult {
    pub fn new(server: ServerInfo) -> Self {
        Self {
            server,
            ..Default::default()
        }
    }

    pub fn category(&self, category: Category) -> &[Definition] {
        match category {
            Category::Tool => &self.tools,
            Category::Prompt => &self.prompts,
            Category::Resource => &self.resources,
            Category::Template => &self.templates,
        }
    }

    pub fn push(&mut self, def: Definition) {
        let bucket = match def.category {
            Category::Tool => &mut self.tools,
            Category::Prompt => &mut self.prompts,
            Category::Resource => &mut self.resources,
            Category::Template => &mut self.templates,
        };
        bucket.push(def);
    }

    /// All definitions, categories in `Category::ALL` order.
    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        Category::ALL
            .into_iter()
            .flat_map(move |c| self.category(c).iter())
    }

    pub fn len(&self) -> usize {
        Category::ALL.iter().map(|c| self.category(*c).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
