//! Folding fetched definitions and their token counts into a report.

use serde::Serialize;

use crate::mcp::{Category, FetchResult, ServerInfo};

/// Token cost of one definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemCost {
    pub name: String,
    pub tokens: usize,
    /// Index in the server's emission order for this category.
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub category: Category,
    pub item_count: usize,
    pub token_total: usize,
    /// Most expensive first; equal costs keep emission order.
    pub items: Vec<ItemCost>,
}

impl CategorySummary {
    /// Token counts indexed by emission position.
    pub fn tokens_by_position(&self) -> Vec<usize> {
        let mut out = vec![0; self.items.len()];
        for item in &self.items {
            if let Some(slot) = out.get_mut(item.position) {
                *slot = item.tokens;
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub server: ServerInfo,
    /// One entry per category, in `Category::ALL` order.
    pub categories: Vec<CategorySummary>,
    pub total_tokens: usize,
    pub warnings: Vec<String>,
}

impl Report {
    pub fn category(&self, category: Category) -> Option<&CategorySummary> {
        self.categories.iter().find(|c| c.category == category)
    }

    /// Category with the highest token total; the earliest wins ties.
    pub fn largest(&self) -> Option<&CategorySummary> {
        self.categories
            .iter()
            .fold(None, |best: Option<&CategorySummary>, c| match best {
                Some(b) if b.token_total >= c.token_total => Some(b),
                _ => Some(c),
            })
    }
}

/// Count every definition with `count` and summarize per category.
pub fn aggregate<F>(result: &FetchResult, count: F) -> Report
where
    F: Fn(&str) -> usize,
{
    let categories: Vec<CategorySummary> = Category::ALL
        .into_iter()
        .map(|category| {
            let mut items: Vec<ItemCost> = result
                .category(category)
                .iter()
                .enumerate()
                .map(|(position, def)| ItemCost {
                    name: def.name.clone(),
                    tokens: count(&def.canonical_text),
                    position,
                })
                .collect();
            let token_total = items.iter().map(|i| i.tokens).sum();
            items.sort_by(|a, b| b.tokens.cmp(&a.tokens));
            CategorySummary {
                category,
                item_count: items.len(),
                token_total,
                items,
            }
        })
        .collect();
    let total_tokens = categories.iter().map(|c| c.token_total).sum();
    tracing::debug!(
        "aggregated {} definition(s) into {} tokens",
        result.len(),
        total_tokens
    );
    Report {
        server: result.server.clone(),
        categories,
        total_tokens,
        warnings: result.warnings.clone(),
    }
}
