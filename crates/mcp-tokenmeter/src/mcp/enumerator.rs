//! Lazy, capability-gated enumeration of a server's definitions.
//!
//! `Enumeration` pulls one page at a time and yields definitions one by one.
//! `collect_definitions` drives every admitted category and applies the
//! failure policy: tools and prompts must be complete, resources and
//! templates degrade to a warning.

use std::collections::{HashSet, VecDeque};

use serde_json::Value;

use super::types::{Capabilities, Category, Definition, FetchResult, ServerInfo};
use crate::error::{EnumerationError, RpcFailure};
use crate::serialize::canonical_definition;

/// One page of raw items from a `*/list` call.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_cursor: Option<String>,
}

impl Page {
    /// Pick the category's item array and the continuation cursor out of a
    /// list result. A missing array is an empty page.
    pub fn from_result(category: Category, result: Value) -> Result<Self, RpcFailure> {
        let Value::Object(mut map) = result else {
            return Err(RpcFailure::Malformed(format!(
                "{} result is not an object",
                category.list_method()
            )));
        };
        let items = match map.remove(category.result_key()) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(RpcFailure::Malformed(format!(
                    "`{}` is not an array",
                    category.result_key()
                )));
            }
        };
        let next_cursor = match map.remove("nextCursor") {
            Some(Value::String(c)) if !c.is_empty() => Some(c),
            _ => None,
        };
        Ok(Self { items, next_cursor })
    }
}

/// Anything that can answer paginated list requests.
#[async_trait::async_trait]
pub trait DefinitionSource: Send {
    async fn list_page(
        &mut self,
        category: Category,
        cursor: Option<&str>,
    ) -> Result<Page, RpcFailure>;
}

enum Next {
    First,
    Cursor(String),
    Fail(RpcFailure),
    Done,
}

/// Finite, non-restartable sequence of one category's definitions.
pub struct Enumeration<'s, S: DefinitionSource + ?Sized> {
    source: &'s mut S,
    category: Category,
    buffered: VecDeque<Value>,
    next: Next,
    seen_cursors: HashSet<String>,
}

pub fn enumerate<S: DefinitionSource + ?Sized>(source: &mut S, category: Category) -> Enumeration<'_, S> {
    Enumeration {
        source,
        category,
        buffered: VecDeque::new(),
        next: Next::First,
        seen_cursors: HashSet::new(),
    }
}

impl<S: DefinitionSource + ?Sized> Enumeration<'_, S> {
    pub fn category(&self) -> Category {
        self.category
    }

    /// Next definition, the error that ended the sequence, or `None` once
    /// exhausted. Nothing is yielded after an error.
    pub async fn next(&mut self) -> Option<Result<Definition, EnumerationError>> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Some(match canonical_definition(self.category, item) {
                    Ok(def) => Ok(def),
                    Err(e) => {
                        self.buffered.clear();
                        self.next = Next::Done;
                        Err(self.fail(RpcFailure::Malformed(e.to_string())))
                    }
                });
            }

            let cursor = match std::mem::replace(&mut self.next, Next::Done) {
                Next::Done => return None,
                Next::Fail(cause) => return Some(Err(self.fail(cause))),
                Next::First => None,
                Next::Cursor(c) => Some(c),
            };

            let page = match self.source.list_page(self.category, cursor.as_deref()).await {
                Ok(page) => page,
                Err(cause) => return Some(Err(self.fail(cause))),
            };
            tracing::debug!(
                "{}: page of {} item(s){}",
                self.category,
                page.items.len(),
                if page.next_cursor.is_some() { ", more to come" } else { "" }
            );
            self.buffered.extend(page.items);
            self.next = match page.next_cursor {
                None => Next::Done,
                Some(c) if self.seen_cursors.insert(c.clone()) => Next::Cursor(c),
                Some(c) => Next::Fail(RpcFailure::Malformed(format!(
                    "server repeated pagination cursor {:?}",
                    c
                ))),
            };
        }
    }

    fn fail(&self, cause: RpcFailure) -> EnumerationError {
        EnumerationError {
            category: self.category,
            cause,
        }
    }
}

/// Enumerate every category `capabilities` admits, in `Category::ALL` order.
pub async fn collect_definitions<S: DefinitionSource + ?Sized>(
    source: &mut S,
    capabilities: Capabilities,
    server: ServerInfo,
) -> Result<FetchResult, EnumerationError> {
    let mut result = FetchResult::new(server);
    for category in Category::ALL {
        if !capabilities.admits(category) {
            tracing::debug!("server does not declare {:?}; skipping {}", category.capability(), category);
            continue;
        }
        let mut items = enumerate(source, category);
        let mut yielded = 0usize;
        while let Some(step) = items.next().await {
            match step {
                Ok(def) => {
                    yielded += 1;
                    result.push(def);
                }
                Err(err) if category.is_load_bearing() => return Err(err),
                Err(err) => {
                    tracing::warn!("{} (keeping {} item(s))", err, yielded);
                    result.warnings.push(err.as_warning());
                    break;
                }
            }
        }
        tracing::info!("{}: {} definition(s)", category, yielded);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::Capability;
    use serde_json::json;
    use std::collections::HashMap;

    /// Serves pre-scripted pages per category; a missing script is an error.
    #[derive(Default)]
    struct Scripted {
        pages: HashMap<Category, VecDeque<Result<Page, RpcFailure>>>,
        calls: Vec<(Category, Option<String>)>,
    }

    impl Scripted {
        fn page(mut self, category: Category, items: Vec<Value>, next: Option<&str>) -> Self {
            self.pages.entry(category).or_default().push_back(Ok(Page {
                items,
                next_cursor: next.map(str::to_string),
            }));
            self
        }

        fn error(mut self, category: Category, message: &str) -> Self {
            self.pages
                .entry(category)
                .or_default()
                .push_back(Err(RpcFailure::Remote {
                    code: -32603,
                    message: message.to_string(),
                }));
            self
        }
    }

    #[async_trait::async_trait]
    impl DefinitionSource for Scripted {
        async fn list_page(
            &mut self,
            category: Category,
            cursor: Option<&str>,
        ) -> Result<Page, RpcFailure> {
            self.calls.push((category, cursor.map(str::to_string)));
            self.pages
                .get_mut(&category)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Err(RpcFailure::Malformed(format!("unscripted {}", category))))
        }
    }

    fn tool(name: &str) -> Value {
        json!({"name": name, "inputSchema": {"type": "object"}})
    }

    fn resource(name: &str) -> Value {
        json!({"name": name, "uri": format!("mem://{}", name)})
    }

    fn all_caps() -> Capabilities {
        Capabilities::NONE
            .with(Capability::Tools)
            .with(Capability::Prompts)
            .with(Capability::Resources)
    }

    #[test]
    fn page_parsing_handles_missing_and_empty_fields() {
        let page = Page::from_result(Category::Template, json!({"resourceTemplates": [{}], "nextCursor": ""}))
            .expect("page");
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_cursor, None);

        let page = Page::from_result(Category::Tool, json!({})).expect("page");
        assert!(page.items.is_empty());

        assert!(Page::from_result(Category::Tool, json!({"tools": {}})).is_err());
        assert!(Page::from_result(Category::Tool, json!([])).is_err());
    }

    #[tokio::test]
    async fn follows_cursors_lazily() {
        let mut source = Scripted::default()
            .page(Category::Tool, vec![tool("a"), tool("b")], Some("p2"))
            .page(Category::Tool, vec![tool("c")], None);
        let mut seq = enumerate(&mut source, Category::Tool);
        assert_eq!(seq.category(), Category::Tool);
        let first = seq.next().await.expect("item").expect("ok");
        assert_eq!(first.name, "a");
        let mut names = vec![first.name];
        while let Some(step) = seq.next().await {
            names.push(step.expect("ok").name);
        }
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(seq.next().await.is_none());
        assert_eq!(
            source.calls,
            vec![(Category::Tool, None), (Category::Tool, Some("p2".to_string()))]
        );
    }

    #[tokio::test]
    async fn sequence_ends_after_an_error() {
        let mut source = Scripted::default()
            .page(Category::Resource, vec![resource("a")], Some("p2"))
            .error(Category::Resource, "boom");
        let mut seq = enumerate(&mut source, Category::Resource);
        assert!(seq.next().await.expect("item").is_ok());
        let err = seq.next().await.expect("error").expect_err("err");
        assert_eq!(err.category, Category::Resource);
        assert!(seq.next().await.is_none());
    }

    #[tokio::test]
    async fn repeated_cursor_is_an_error() {
        let mut source = Scripted::default()
            .page(Category::Tool, vec![tool("a")], Some("same"))
            .page(Category::Tool, vec![tool("b")], Some("same"));
        let mut seq = enumerate(&mut source, Category::Tool);
        let mut names = Vec::new();
        let mut failure = None;
        while let Some(step) = seq.next().await {
            match step {
                Ok(def) => names.push(def.name),
                Err(e) => failure = Some(e),
            }
        }
        assert_eq!(names, vec!["a", "b"]);
        assert!(failure.expect("error").cause.to_string().contains("repeated"));
    }

    #[tokio::test]
    async fn no_capabilities_means_nothing_fetched() {
        let mut source = Scripted::default();
        let result = collect_definitions(&mut source, Capabilities::NONE, ServerInfo::default())
            .await
            .expect("collect");
        assert!(result.is_empty());
        assert!(result.warnings.is_empty());
        assert!(source.calls.is_empty());
    }

    #[tokio::test]
    async fn resource_failure_keeps_partial_items_and_warns() {
        let mut source = Scripted::default()
            .page(Category::Tool, vec![tool("t")], None)
            .page(Category::Prompt, vec![], None)
            .page(Category::Resource, vec![resource("r1"), resource("r2")], Some("p2"))
            .error(Category::Resource, "resource backend down")
            .page(Category::Template, vec![], None);
        let result = collect_definitions(&mut source, all_caps(), ServerInfo::default())
            .await
            .expect("partial success");
        assert_eq!(result.tools.len(), 1);
        assert_eq!(result.resources.len(), 2);
        assert!(result.templates.is_empty());
        assert_eq!(
            result.warnings,
            vec!["resources: resource backend down (code -32603)".to_string()]
        );
    }

    #[tokio::test]
    async fn template_failure_warns_with_its_own_prefix() {
        let mut source = Scripted::default()
            .page(Category::Resource, vec![resource("r")], None)
            .error(Category::Template, "no templates here");
        let caps = Capabilities::NONE.with(Capability::Resources);
        let result = collect_definitions(&mut source, caps, ServerInfo::default())
            .await
            .expect("partial success");
        assert_eq!(result.resources.len(), 1);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].starts_with("templates: "));
    }

    #[tokio::test]
    async fn tool_failure_is_fatal() {
        let mut source = Scripted::default()
            .page(Category::Tool, vec![tool("t")], Some("p2"))
            .error(Category::Tool, "crashed");
        let err = collect_definitions(&mut source, all_caps(), ServerInfo::default())
            .await
            .expect_err("fatal");
        assert_eq!(err.category, Category::Tool);
        assert_eq!(source.calls.len(), 2);
    }

    #[tokio::test]
    async fn malformed_prompt_is_fatal() {
        let mut source = Scripted::default()
            .page(Category::Prompt, vec![json!({"name": ["not", "a", "string"]})], None);
        let caps = Capabilities::NONE.with(Capability::Prompts);
        let err = collect_definitions(&mut source, caps, ServerInfo::default())
            .await
            .expect_err("fatal");
        assert_eq!(err.category, Category::Prompt);
        assert!(matches!(err.cause, RpcFailure::Malformed(_)));
    }

    #[tokio::test]
    async fn duplicate_names_are_kept() {
        let mut source = Scripted::default().page(Category::Tool, vec![tool("same"), tool("same")], None);
        let caps = Capabilities::NONE.with(Capability::Tools);
        let result = collect_definitions(&mut source, caps, ServerInfo::default())
            .await
            .expect("collect");
        assert_eq!(result.tools.len(), 2);
    }
}
