//! Human-readable and machine-readable report output.

use std::io::{self, Write};

use serde::Serialize;

use super::estimate::CostEstimator;
use super::summary::Report;
use crate::mcp::{Category, FetchResult};
use crate::serialize::to_canonical_text;

const LARGEST_SHOWN: usize = 3;

/// `1234567` -> `"1,234,567"`.
pub fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn write_text<W: Write>(
    out: &mut W,
    report: &Report,
    estimator: &dyn CostEstimator,
) -> io::Result<()> {
    if !report.server.name.is_empty() {
        match report.server.version.as_deref() {
            Some(version) => writeln!(out, "Server: {} v{}\n", report.server.name, version)?,
            None => writeln!(out, "Server: {}\n", report.server.name)?,
        }
    }

    for summary in &report.categories {
        writeln!(
            out,
            "{:<12} {:>5}    ({} tokens)",
            format!("{}:", summary.category.title()),
            summary.item_count,
            format_number(summary.token_total)
        )?;
    }

    writeln!(out, "{:18} ─────────────", "")?;
    writeln!(out, "{:<12}       ~{} tokens", "Total:", format_number(report.total_tokens))?;
    writeln!(
        out,
        "{:<12}       ~{} tokens (estimate)",
        format!("{}:", estimator.label()),
        format_number(estimator.estimate(report))
    )?;

    if let Some(largest) = report.largest().filter(|c| !c.items.is_empty()) {
        writeln!(out, "\nLargest {}:", largest.category.label())?;
        for (rank, item) in largest.items.iter().take(LARGEST_SHOWN).enumerate() {
            writeln!(
                out,
                "  {}. {:<24} {} tokens",
                rank + 1,
                item.name,
                format_number(item.tokens)
            )?;
        }
    }

    if !report.warnings.is_empty() {
        writeln!(out, "\nWarnings:")?;
        for warning in &report.warnings {
            writeln!(out, "  - {}", warning)?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    server: JsonServer<'a>,
    definitions: Vec<JsonDefinition<'a>>,
    summary: JsonSummary,
}

#[derive(Serialize)]
struct JsonServer<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
}

#[derive(Serialize)]
struct JsonDefinition<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    json: &'a str,
    tokens: usize,
}

#[derive(Serialize)]
struct JsonSummary {
    tools: usize,
    prompts: usize,
    resources: usize,
    templates: usize,
    total: usize,
}

/// Every definition with its canonical text and token count, plus a summary
/// of item counts per category and the token total.
pub fn write_json<W: Write>(out: &mut W, result: &FetchResult, report: &Report) -> io::Result<()> {
    let mut definitions = Vec::with_capacity(result.len());
    for category in Category::ALL {
        let tokens = report
            .category(category)
            .map(|s| s.tokens_by_position())
            .unwrap_or_default();
        for (position, def) in result.category(category).iter().enumerate() {
            definitions.push(JsonDefinition {
                kind: category.type_name(),
                name: &def.name,
                json: &def.canonical_text,
                tokens: tokens.get(position).copied().unwrap_or(0),
            });
        }
    }
    let count = |c: Category| report.category(c).map_or(0, |s| s.item_count);
    let doc = JsonReport {
        server: JsonServer {
            name: &report.server.name,
            version: report.server.version.as_deref(),
        },
        definitions,
        summary: JsonSummary {
            tools: count(Category::Tool),
            prompts: count(Category::Prompt),
            resources: count(Category::Resource),
            templates: count(Category::Template),
            total: report.total_tokens,
        },
    };
    let text = to_canonical_text(&doc).map_err(io::Error::other)?;
    writeln!(out, "{}", text)
}
