//! TypeScript-to-TJS erasure.
//!
//! Converts `: Type` annotations into example values so annotated source can
//! enter the normal TJS pipeline: `string` becomes `''`, `number` becomes
//! `0`, `T[]` becomes an array of the element example, `T | null` becomes
//! `ex || null`. Optional parameters (`x?: T`) become default-assignment
//! parameters. Return annotations become `-! EX` — the example is synthetic,
//! so the signature test is skipped rather than asserted.

use crate::compiler::diagnostics::{CompileResult, SyntaxError};
use crate::compiler::preprocess::{
    find_matching, find_token, from_chars, is_ident_char, skip_string, skip_ws,
    splice_preserving_lines, to_chars,
};

/// Rewrite TypeScript source into TJS source.
pub fn from_ts(source: &str) -> CompileResult<String> {
    let mut src = source.to_string();
    strip_type_declarations(&mut src);
    rewrite_function_headers(&mut src)?;
    strip_variable_annotations(&mut src);
    strip_as_casts(&mut src);
    Ok(src)
}

/// Remove `interface X { … }` and `type X = …;` declarations entirely.
fn strip_type_declarations(src: &mut String) {
    let mut chars = to_chars(src);
    let mut from = 0;
    while let Some(kw) = find_token(&chars, "interface", from) {
        let Some(brace) = next_brace(&chars, kw) else {
            from = kw + 9;
            continue;
        };
        match find_matching(&chars, brace) {
            Some(close) => {
                splice_preserving_lines(&mut chars, kw, close + 1, "");
                from = kw;
            }
            None => from = kw + 9,
        }
    }
    let mut from = 0;
    while let Some(kw) = find_token(&chars, "type", from) {
        // Only statement-position alias declarations: `type X = …`.
        let mut j = skip_ws(&chars, kw + 4);
        let name_start = j;
        while j < chars.len() && is_ident_char(chars[j]) {
            j += 1;
        }
        if j == name_start {
            from = kw + 4;
            continue;
        }
        // Skip generic parameters.
        let mut k = skip_ws(&chars, j);
        if chars.get(k) == Some(&'<') {
            let mut depth = 1;
            k += 1;
            while k < chars.len() && depth > 0 {
                match chars[k] {
                    '<' => depth += 1,
                    '>' => depth -= 1,
                    _ => {}
                }
                k += 1;
            }
        }
        k = skip_ws(&chars, k);
        if chars.get(k) != Some(&'=') {
            from = kw + 4;
            continue;
        }
        // Consume to end of statement (semicolon or end of line at depth 0).
        let mut end = k + 1;
        let mut depth = 0usize;
        while end < chars.len() {
            match chars[end] {
                '\'' | '"' | '`' => end = skip_string(&chars, end),
                '{' | '(' | '[' | '<' => {
                    depth += 1;
                    end += 1;
                }
                '}' | ')' | ']' | '>' => {
                    depth = depth.saturating_sub(1);
                    end += 1;
                }
                ';' if depth == 0 => {
                    end += 1;
                    break;
                }
                '\n' if depth == 0 => break,
                _ => end += 1,
            }
        }
        splice_preserving_lines(&mut chars, kw, end, "");
        from = kw;
    }
    *src = from_chars(&chars);
}

fn next_brace(chars: &[char], from: usize) -> Option<usize> {
    let mut i = from;
    while i < chars.len() {
        match chars[i] {
            '{' => return Some(i),
            '\n' => {
                // An interface body may open on the next line.
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

/// Rewrite every function header: parameter annotations become examples,
/// optional parameters become defaults, the return annotation becomes `-! EX`.
fn rewrite_function_headers(src: &mut String) -> CompileResult<()> {
    let mut chars = to_chars(src);
    let mut from = 0;
    while let Some(kw) = find_token(&chars, "function", from) {
        let mut j = skip_ws(&chars, kw + 8);
        while j < chars.len() && is_ident_char(chars[j]) {
            j += 1;
        }
        j = skip_ws(&chars, j);
        if chars.get(j) != Some(&'(') {
            from = kw + 8;
            continue;
        }
        let Some(close) = find_matching(&chars, j) else {
            from = j + 1;
            continue;
        };
        let params_src = from_chars(&chars[j + 1..close]);
        let rewritten = rewrite_params(&params_src)?;

        // Return annotation: `): T {` → `) -! EX {`.
        let mut after = skip_ws(&chars, close + 1);
        let mut replacement_tail = String::new();
        let mut tail_end = close + 1;
        if chars.get(after) == Some(&':') {
            after += 1;
            let ret_start = after;
            let mut depth = 0usize;
            let mut k = ret_start;
            let mut body_open = None;
            while k < chars.len() {
                match chars[k] {
                    '\'' | '"' | '`' => k = skip_string(&chars, k),
                    '{' if depth == 0 => {
                        // Object-type annotations start the annotation with
                        // `{`; a body brace only follows a complete type.
                        let text = from_chars(&chars[ret_start..k]);
                        if text.trim().is_empty() {
                            depth += 1;
                            k += 1;
                        } else {
                            body_open = Some(k);
                            break;
                        }
                    }
                    '{' | '(' | '[' | '<' => {
                        depth += 1;
                        k += 1;
                    }
                    ')' | ']' | '>' | '}' => {
                        depth = depth.saturating_sub(1);
                        k += 1;
                    }
                    _ => k += 1,
                }
            }
            if let Some(body) = body_open {
                let annotation = from_chars(&chars[ret_start..body]);
                let example = type_to_example(annotation.trim());
                replacement_tail = format!(" -! {} ", example);
                tail_end = body;
            }
        }

        let mut replacement = rewritten;
        if !replacement_tail.is_empty() {
            replacement.push(')');
            replacement.push_str(&replacement_tail);
            splice_preserving_lines(&mut chars, j + 1, tail_end, &replacement);
        } else {
            splice_preserving_lines(&mut chars, j + 1, close, &replacement);
        }
        from = j + 1 + replacement.chars().count();
    }
    *src = from_chars(&chars);
    Ok(())
}

/// Rewrite one TS parameter list into TJS example form.
fn rewrite_params(params: &str) -> CompileResult<String> {
    let chars = to_chars(params);
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut i = 0;
    while i <= chars.len() {
        let at_comma = i < chars.len() && chars[i] == ',' && depth == 0;
        if i == chars.len() || at_comma {
            let seg = from_chars(&chars[start..i]);
            if !seg.trim().is_empty() {
                pieces.push(rewrite_one_param(&seg)?);
            }
            start = i + 1;
            i += 1;
            continue;
        }
        match chars[i] {
            '\'' | '"' | '`' => i = skip_string(&chars, i),
            '(' | '[' | '{' | '<' => {
                depth += 1;
                i += 1;
            }
            ')' | ']' | '}' | '>' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(pieces.join(", "))
}

fn rewrite_one_param(seg: &str) -> CompileResult<String> {
    let trimmed = seg.trim();
    if trimmed.starts_with("...") {
        return Ok(trimmed.to_string());
    }
    let chars = to_chars(trimmed);
    let mut name_end = 0;
    while name_end < chars.len() && is_ident_char(chars[name_end]) {
        name_end += 1;
    }
    let name = from_chars(&chars[..name_end]);
    if name.is_empty() {
        return Err(SyntaxError::new(
            format!("Cannot rewrite parameter '{}'", trimmed),
            1,
            1,
        ));
    }
    let mut i = skip_ws(&chars, name_end);
    let optional = chars.get(i) == Some(&'?');
    if optional {
        i = skip_ws(&chars, i + 1);
    }
    if chars.get(i) != Some(&':') {
        // No annotation; keep as-is (may already carry a default).
        return Ok(trimmed.to_string());
    }
    i = skip_ws(&chars, i + 1);
    // Annotation runs until a top-level `=` (existing default) or the end.
    let ann_start = i;
    let mut depth = 0usize;
    let mut default_at = None;
    while i < chars.len() {
        match chars[i] {
            '\'' | '"' | '`' => i = skip_string(&chars, i),
            '(' | '[' | '{' | '<' => {
                depth += 1;
                i += 1;
            }
            ')' | ']' | '}' | '>' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            '=' if depth == 0 && chars.get(i + 1) != Some(&'>') => {
                default_at = Some(i);
                break;
            }
            _ => i += 1,
        }
    }
    match default_at {
        Some(eq) => {
            // Existing default wins; annotation is dropped.
            let default = from_chars(&chars[eq + 1..]);
            Ok(format!("{} ={}", name, default))
        }
        None => {
            let annotation = from_chars(&chars[ann_start..]);
            let example = type_to_example(annotation.trim());
            if optional {
                Ok(format!("{} = {}", name, example))
            } else {
                Ok(format!("{}: {}", name, example))
            }
        }
    }
}

/// Map a TypeScript type expression to a TJS example value.
fn type_to_example(ty: &str) -> String {
    let ty = ty.trim();
    // Unions: `T | null` keeps null as a union member of examples.
    let members = split_top_level(ty, '|');
    if members.len() > 1 {
        let examples: Vec<String> = members
            .iter()
            .map(|m| type_to_example(m))
            .collect();
        return examples.join(" || ");
    }
    if let Some(elem) = ty.strip_suffix("[]") {
        return format!("[{}]", type_to_example(elem));
    }
    if let Some(rest) = ty.strip_prefix("Array<") {
        if let Some(elem) = rest.strip_suffix('>') {
            return format!("[{}]", type_to_example(elem));
        }
    }
    if ty.starts_with('{') && ty.ends_with('}') {
        let inner = &ty[1..ty.len() - 1];
        let mut fields = Vec::new();
        for entry in split_top_level_multi(inner, &[';', ',']) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if let Some((key, field_ty)) = entry.split_once(':') {
                let key = key.trim().trim_end_matches('?');
                fields.push(format!("{}: {}", key, type_to_example(field_ty)));
            }
        }
        return format!("{{{}}}", fields.join(", "));
    }
    if (ty.starts_with('\'') && ty.ends_with('\'')) || (ty.starts_with('"') && ty.ends_with('"'))
    {
        return ty.to_string();
    }
    match ty {
        "string" => "''".to_string(),
        "number" => "0".to_string(),
        "boolean" => "false".to_string(),
        "null" | "undefined" | "void" => "null".to_string(),
        "true" => "true".to_string(),
        "false" => "false".to_string(),
        _ => "{}".to_string(),
    }
}

fn split_top_level(s: &str, sep: char) -> Vec<String> {
    split_top_level_multi(s, &[sep])
}

fn split_top_level_multi(s: &str, seps: &[char]) -> Vec<String> {
    let chars = to_chars(s);
    let mut out = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\'' | '"' | '`' => i = skip_string(&chars, i),
            '(' | '[' | '{' | '<' => {
                depth += 1;
                i += 1;
            }
            ')' | ']' | '}' | '>' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            c if depth == 0 && seps.contains(&c) => {
                out.push(from_chars(&chars[start..i]));
                start = i + 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    out.push(from_chars(&chars[start..]));
    out
}

/// `const x: T = …` → `const x = …` (also `let`/`var`).
fn strip_variable_annotations(src: &mut String) {
    let mut chars = to_chars(src);
    for kw_name in ["const", "let", "var"] {
        let mut from = 0;
        while let Some(kw) = find_token(&chars, kw_name, from) {
            let mut j = skip_ws(&chars, kw + kw_name.len());
            let name_start = j;
            while j < chars.len() && is_ident_char(chars[j]) {
                j += 1;
            }
            if j == name_start {
                from = kw + kw_name.len();
                continue;
            }
            let colon = skip_ws(&chars, j);
            if chars.get(colon) != Some(&':') {
                from = j;
                continue;
            }
            // Annotation runs to a top-level `=` or end of statement.
            let mut k = colon + 1;
            let mut depth = 0usize;
            let mut eq = None;
            while k < chars.len() {
                match chars[k] {
                    '\'' | '"' | '`' => k = skip_string(&chars, k),
                    '(' | '[' | '{' | '<' => {
                        depth += 1;
                        k += 1;
                    }
                    ')' | ']' | '}' | '>' => {
                        depth = depth.saturating_sub(1);
                        k += 1;
                    }
                    '=' if depth == 0 && chars.get(k + 1) != Some(&'>') => {
                        eq = Some(k);
                        break;
                    }
                    ';' | '\n' if depth == 0 => break,
                    _ => k += 1,
                }
            }
            let end = eq.unwrap_or(k);
            splice_preserving_lines(&mut chars, colon, end, " ");
            from = colon;
        }
    }
    *src = from_chars(&chars);
}

/// Drop `as T` casts.
fn strip_as_casts(src: &mut String) {
    let mut chars = to_chars(src);
    let mut from = 0;
    while let Some(kw) = find_token(&chars, "as", from) {
        // Consume `as` plus the following type word(s).
        let mut j = skip_ws(&chars, kw + 2);
        let type_start = j;
        while j < chars.len() && (is_ident_char(chars[j]) || chars[j] == '.') {
            j += 1;
        }
        if j == type_start {
            from = kw + 2;
            continue;
        }
        splice_preserving_lines(&mut chars, kw, j, "");
        from = kw;
    }
    *src = from_chars(&chars);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::preprocess::preprocess;

    #[test]
    fn annotations_become_examples() {
        let out = from_ts("function greet(name: string, times: number): string { return name }")
            .unwrap();
        assert!(out.contains("name: ''"));
        assert!(out.contains("times: 0"));
        assert!(out.contains("-! ''"));
    }

    #[test]
    fn optional_params_become_defaults() {
        let out = from_ts("function f(a: string, b?: number) { return a }").unwrap();
        assert!(out.contains("a: ''"));
        assert!(out.contains("b = 0"));
    }

    #[test]
    fn existing_defaults_survive() {
        let out = from_ts("function f(a: number = 7) { return a }").unwrap();
        assert!(out.contains("a = 7"));
        assert!(!out.contains(": number"));
    }

    #[test]
    fn array_and_object_types() {
        let out = from_ts("function f(xs: string[], o: {a: number}) { return xs }").unwrap();
        assert!(out.contains("xs: ['']"));
        assert!(out.contains("o: {a: 0}"));
    }

    #[test]
    fn nullable_union() {
        let out = from_ts("function f(x: string | null) { return x }").unwrap();
        assert!(out.contains("x: '' || null"));
    }

    #[test]
    fn interfaces_and_aliases_removed() {
        let out = from_ts("interface U { name: string }\ntype ID = string | number\nfunction f(u: U) { return u }")
            .unwrap();
        assert!(!out.contains("interface"));
        assert!(!out.contains("type ID"));
        assert!(out.contains("u: {}"));
    }

    #[test]
    fn variable_annotations_stripped() {
        let out = from_ts("function f() { const x: number = 1; return x }").unwrap();
        assert!(out.contains("const x = 1"));
    }

    #[test]
    fn output_feeds_the_pipeline() {
        let out = from_ts("function double(x: number): number { return x * 2 }").unwrap();
        let pre = preprocess(&out).unwrap();
        assert!(pre.required_params["double"].contains("x"));
        assert_eq!(
            pre.return_policy,
            crate::compiler::preprocess::ReturnPolicy::Skip
        );
    }
}
