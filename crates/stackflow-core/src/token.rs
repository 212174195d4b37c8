//! 参照プレースホルダーのエンコード／デコード
//!
//! 合成ドキュメント（JSON）では参照を `"${resource.attribute}"` 形式の文字列で表します。
//! `{` の直前に並ぶ `$` は、リテラルでは個数を2倍にしてエスケープします。
//! デコード時は `{` 直前の `$` が奇数個ならプレースホルダーの開始、偶数個ならリテラルです
//! （`$${` は `${`、`$$${a.b}` は `$` の後に参照）。

use crate::model::{AttrValue, Reference, Segment};
use serde_json::Value;
use std::collections::BTreeMap;

const OPEN: &str = "${";

/// 属性値をプレースホルダー付きJSONに変換
pub fn encode(value: &AttrValue) -> Value {
    match value {
        AttrValue::Literal(v) => escape_value(v),
        AttrValue::Ref(r) => Value::String(placeholder(r)),
        AttrValue::Interpolated(segments) => {
            let mut out = String::new();
            for (i, segment) in segments.iter().enumerate() {
                match segment {
                    Segment::Text(t) => {
                        let before_ref = matches!(segments.get(i + 1), Some(Segment::Ref(_)));
                        out.push_str(&escape(t, before_ref));
                    }
                    Segment::Ref(r) => out.push_str(&placeholder(r)),
                }
            }
            Value::String(out)
        }
        AttrValue::List(items) => Value::Array(items.iter().map(encode).collect()),
        AttrValue::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), encode(v)))
                .collect(),
        ),
    }
}

/// プレースホルダー付きJSONを属性値に戻す
pub fn decode(value: &Value) -> AttrValue {
    match value {
        Value::String(s) => parse_template(s),
        Value::Array(items) => AttrValue::list(items.iter().map(decode).collect()),
        Value::Object(map) => AttrValue::object(
            map.iter()
                .map(|(k, v)| (k.clone(), decode(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
        other => AttrValue::Literal(other.clone()),
    }
}

/// 文字列中の `${...}` を参照として解釈
///
/// 文字列全体が1つの参照なら [`AttrValue::Ref`]、参照を含まなければリテラル、
/// 混在していれば [`AttrValue::Interpolated`] になります。
/// 参照式として解釈できない `${...}` はそのまま文字列として残ります。
pub fn parse_template(input: &str) -> AttrValue {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = input;

    while let Some(pos) = rest.find(OPEN) {
        let run_start = rest[..pos].trim_end_matches('$').len();
        let dollars = pos + 1 - run_start;
        text.push_str(&rest[..run_start]);
        let after = &rest[pos + OPEN.len()..];

        if dollars % 2 == 0 {
            text.push_str(&"$".repeat(dollars / 2));
            text.push('{');
            rest = after;
            continue;
        }

        match after.find('}').and_then(|end| Some((end, Reference::parse(&after[..end])?))) {
            Some((end, reference)) => {
                text.push_str(&"$".repeat(dollars / 2));
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Ref(reference));
                rest = &after[end + 1..];
            }
            None => {
                text.push_str(&rest[run_start..pos + OPEN.len()]);
                rest = after;
            }
        }
    }
    text.push_str(rest);
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }

    match segments.len() {
        0 => AttrValue::Literal(Value::String(String::new())),
        1 => match segments.remove(0) {
            Segment::Text(t) => AttrValue::Literal(Value::String(t)),
            Segment::Ref(r) => AttrValue::Ref(r),
        },
        _ => AttrValue::Interpolated(segments),
    }
}

fn placeholder(reference: &Reference) -> String {
    format!("${{{}}}", reference)
}

/// `{` の直前、または後ろに参照が続く末尾の `$` の並びを2倍にする
fn escape(text: &str, before_ref: bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut dollars = 0;
    for c in text.chars() {
        match c {
            '$' => dollars += 1,
            '{' => {
                out.push_str(&"$".repeat(dollars * 2));
                out.push('{');
                dollars = 0;
            }
            _ => {
                out.push_str(&"$".repeat(dollars));
                out.push(c);
                dollars = 0;
            }
        }
    }
    let trailing = if before_ref { dollars * 2 } else { dollars };
    out.push_str(&"$".repeat(trailing));
    out
}

fn escape_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(escape(s, false)),
        Value::Array(items) => Value::Array(items.iter().map(escape_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), escape_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
