//! Canonical text form of an advertised definition.
//!
//! Each category has a record type whose field order is the declared schema
//! order; optional fields that are absent or empty are left out, and so are
//! `false` hints and a zero priority. Free-form objects (schemas, `_meta`)
//! keep sorted key order. The text is pretty-printed with two-space
//! indentation, HTML-sensitive characters escaped and whole-number floats
//! printed without a fraction, which is what a typical MCP client hands to a
//! model.

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::ser::{Formatter, PrettyFormatter};
use serde_json::{Map, Value};

use crate::mcp::{Category, Definition};

fn no_meta(meta: &Option<Map<String, Value>>) -> bool {
    meta.as_ref().is_none_or(Map::is_empty)
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero_f64(n: &f64) -> bool {
    *n == 0.0
}

/// `null` reads as the type's default.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Serialize, Deserialize)]
struct ToolAnnotationsRecord {
    #[serde(rename = "destructiveHint", default, skip_serializing_if = "Option::is_none")]
    destructive_hint: Option<bool>,
    #[serde(
        rename = "idempotentHint",
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "is_false"
    )]
    idempotent_hint: bool,
    #[serde(rename = "openWorldHint", default, skip_serializing_if = "Option::is_none")]
    open_world_hint: Option<bool>,
    #[serde(
        rename = "readOnlyHint",
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "is_false"
    )]
    read_only_hint: bool,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    title: String,
}

/// Audience and priority hints on resources and templates.
#[derive(Debug, Serialize, Deserialize)]
struct AnnotationsRecord {
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    audience: Vec<String>,
    #[serde(
        rename = "lastModified",
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "String::is_empty"
    )]
    last_modified: String,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "is_zero_f64")]
    priority: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct IconRecord {
    #[serde(default)]
    src: String,
    #[serde(rename = "mimeType", default, skip_serializing_if = "String::is_empty")]
    mime_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    sizes: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    theme: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ToolRecord {
    #[serde(rename = "_meta", default, skip_serializing_if = "no_meta")]
    meta: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    annotations: Option<ToolAnnotationsRecord>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(rename = "inputSchema", default)]
    input_schema: Value,
    #[serde(default)]
    name: String,
    #[serde(rename = "outputSchema", default, skip_serializing_if = "Option::is_none")]
    output_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    icons: Vec<IconRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PromptRecord {
    #[serde(rename = "_meta", default, skip_serializing_if = "no_meta")]
    meta: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    arguments: Vec<PromptArgumentRecord>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    icons: Vec<IconRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PromptArgumentRecord {
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(default, skip_serializing_if = "is_false")]
    required: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResourceRecord {
    #[serde(rename = "_meta", default, skip_serializing_if = "no_meta")]
    meta: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    annotations: Option<AnnotationsRecord>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(rename = "mimeType", default, skip_serializing_if = "String::is_empty")]
    mime_type: String,
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    size: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    title: String,
    #[serde(default)]
    uri: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    icons: Vec<IconRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TemplateRecord {
    #[serde(rename = "_meta", default, skip_serializing_if = "no_meta")]
    meta: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    annotations: Option<AnnotationsRecord>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(rename = "mimeType", default, skip_serializing_if = "String::is_empty")]
    mime_type: String,
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    title: String,
    #[serde(rename = "uriTemplate", default)]
    uri_template: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    icons: Vec<IconRecord>,
}

/// Turn one raw list item into a `Definition`.
pub fn canonical_definition(category: Category, item: Value) -> Result<Definition, serde_json::Error> {
    let (name, canonical_text) = match category {
        Category::Tool => {
            let record: ToolRecord = serde_json::from_value(item)?;
            (record.name.clone(), to_canonical_text(&record)?)
        }
        Category::Prompt => {
            let record: PromptRecord = serde_json::from_value(item)?;
            (record.name.clone(), to_canonical_text(&record)?)
        }
        Category::Resource => {
            let record: ResourceRecord = serde_json::from_value(item)?;
            (record.name.clone(), to_canonical_text(&record)?)
        }
        Category::Template => {
            let record: TemplateRecord = serde_json::from_value(item)?;
            (record.name.clone(), to_canonical_text(&record)?)
        }
    };
    Ok(Definition {
        category,
        name,
        canonical_text,
    })
}

/// Two-space pretty JSON with `<`, `>`, `&`, U+2028 and U+2029 escaped.
pub fn to_canonical_text<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let mut buf = Vec::with_capacity(256);
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::default());
    value.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(<serde_json::Error as serde::ser::Error>::custom)
}

#[derive(Default)]
struct CanonicalFormatter<'a> {
    pretty: PrettyFormatter<'a>,
}

impl Formatter for CanonicalFormatter<'_> {
    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_array(writer)
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.pretty.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_object(writer)
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.pretty.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_object_value(writer)
    }

    fn write_f64<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: f64) -> io::Result<()> {
        // `1.0` prints as `1`; past 1e21 the exponent form takes over.
        if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e21 {
            writer.write_all(format!("{}", value).as_bytes())
        } else {
            self.pretty.write_f64(writer, value)
        }
    }

    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        let mut start = 0;
        for (i, ch) in fragment.char_indices() {
            let escaped = match ch {
                '<' => "\\u003c",
                '>' => "\\u003e",
                '&' => "\\u0026",
                '\u{2028}' => "\\u2028",
                '\u{2029}' => "\\u2029",
                _ => continue,
            };
            writer.write_all(fragment[start..i].as_bytes())?;
            writer.write_all(escaped.as_bytes())?;
            start = i + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_fields_follow_schema_order() {
        let item = json!({
            "name": "echo",
            "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}},
            "description": "Echo back",
            "title": "",
            "somethingElse": 1
        });
        let def = canonical_definition(Category::Tool, item).expect("tool");
        assert_eq!(def.name, "echo");
        assert_eq!(
            def.canonical_text,
            "{\n  \"description\": \"Echo back\",\n  \"inputSchema\": {\n    \"properties\": {\n      \"text\": {\n        \"type\": \"string\"\n      }\n    },\n    \"type\": \"object\"\n  },\n  \"name\": \"echo\"\n}"
        );
    }

    #[test]
    fn prompt_arguments_keep_declared_order() {
        let item = json!({
            "name": "greet",
            "arguments": [{"required": true, "description": "who", "name": "person"}]
        });
        let def = canonical_definition(Category::Prompt, item).expect("prompt");
        assert_eq!(
            def.canonical_text,
            "{\n  \"arguments\": [\n    {\n      \"name\": \"person\",\n      \"description\": \"who\",\n      \"required\": true\n    }\n  ],\n  \"name\": \"greet\"\n}"
        );
    }

    #[test]
    fn resource_keeps_uri_and_omits_zero_size() {
        let item = json!({"uri": "file:///a.txt", "name": "a", "mimeType": "text/plain", "size": 0});
        let def = canonical_definition(Category::Resource, item).expect("resource");
        assert_eq!(
            def.canonical_text,
            "{\n  \"mimeType\": \"text/plain\",\n  \"name\": \"a\",\n  \"uri\": \"file:///a.txt\"\n}"
        );
    }

    #[test]
    fn template_uses_uri_template() {
        let item = json!({"uriTemplate": "file:///{path}", "name": "files", "_meta": {}});
        let def = canonical_definition(Category::Template, item).expect("template");
        assert_eq!(
            def.canonical_text,
            "{\n  \"name\": \"files\",\n  \"uriTemplate\": \"file:///{path}\"\n}"
        );
    }

    #[test]
    fn html_sensitive_characters_are_escaped() {
        let text = to_canonical_text(&json!({"d": "a <b> & c"})).expect("text");
        assert_eq!(text, "{\n  \"d\": \"a \\u003cb\\u003e \\u0026 c\"\n}");
    }

    #[test]
    fn empty_containers_stay_compact() {
        let text = to_canonical_text(&json!({"a": [], "b": {}})).expect("text");
        assert_eq!(text, "{\n  \"a\": [],\n  \"b\": {}\n}");
    }

    #[test]
    fn false_tool_hints_are_dropped_and_whole_floats_lose_the_fraction() {
        let item = json!({
            "name": "calc",
            "inputSchema": {
                "type": "object",
                "properties": {"n": {"type": "number", "default": 1.0, "maximum": 2.5}}
            },
            "annotations": {
                "readOnlyHint": false,
                "idempotentHint": false,
                "destructiveHint": false,
                "openWorldHint": null,
                "title": "Calc"
            }
        });
        let def = canonical_definition(Category::Tool, item).expect("tool");
        assert_eq!(
            def.canonical_text,
            r#"{
  "annotations": {
    "destructiveHint": false,
    "title": "Calc"
  },
  "inputSchema": {
    "properties": {
      "n": {
        "default": 1,
        "maximum": 2.5,
        "type": "number"
      }
    },
    "type": "object"
  },
  "name": "calc"
}"#
        );
    }

    #[test]
    fn true_tool_hints_follow_declared_order() {
        let item = json!({
            "name": "rm",
            "annotations": {"title": "Remove", "readOnlyHint": true, "openWorldHint": false, "idempotentHint": true}
        });
        let def = canonical_definition(Category::Tool, item).expect("tool");
        assert!(
            def.canonical_text.starts_with(
                "{\n  \"annotations\": {\n    \"idempotentHint\": true,\n    \"openWorldHint\": false,\n    \"readOnlyHint\": true,\n    \"title\": \"Remove\"\n  },\n"
            ),
            "{}",
            def.canonical_text
        );
    }

    #[test]
    fn resource_annotations_and_icons_are_typed() {
        let item = json!({
            "uri": "file:///a",
            "name": "a",
            "annotations": {"priority": 0.0, "lastModified": "", "audience": ["user"], "extra": 1},
            "icons": [{"theme": "dark", "sizes": ["16x16"], "src": "a.png"}]
        });
        let def = canonical_definition(Category::Resource, item).expect("resource");
        assert_eq!(
            def.canonical_text,
            r#"{
  "annotations": {
    "audience": [
      "user"
    ]
  },
  "name": "a",
  "uri": "file:///a",
  "icons": [
    {
      "src": "a.png",
      "sizes": [
        "16x16"
      ],
      "theme": "dark"
    }
  ]
}"#
        );
    }

    #[test]
    fn nonzero_priority_is_kept() {
        let item = json!({
            "uriTemplate": "db://{table}",
            "name": "rows",
            "annotations": {"priority": 0.5, "audience": ["assistant"]}
        });
        let def = canonical_definition(Category::Template, item).expect("template");
        assert!(def.canonical_text.contains("\"priority\": 0.5"), "{}", def.canonical_text);
        assert!(def.canonical_text.contains("\"audience\": [\n      \"assistant\"\n    ],"));
    }

    #[test]
    fn floats_print_like_integers_when_whole() {
        let text = to_canonical_text(&json!({"a": 1.0, "b": -3.0, "c": 0.25, "d": 7})).expect("text");
        assert_eq!(text, "{\n  \"a\": 1,\n  \"b\": -3,\n  \"c\": 0.25,\n  \"d\": 7\n}");
    }

    #[test]
    fn mistyped_fields_are_rejected() {
        let err = canonical_definition(Category::Tool, json!({"name": 5}));
        assert!(err.is_err());
    }

    #[test]
    fn rendering_is_stable() {
        let item = json!({"name": "x", "inputSchema": {"b": 1, "a": 2}, "annotations": {"readOnlyHint": true}});
        let a = canonical_definition(Category::Tool, item.clone()).expect("a");
        let b = canonical_definition(Category::Tool, item).expect("b");
        assert_eq!(a, b);
    }
}
