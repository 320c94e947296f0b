// 接続文字列パーサー
//
// ADO.NET / Npgsql 形式の `key=value;key=value` 接続文字列を扱う。
// キーは大文字小文字を区別せず、値は `'...'` / `"..."` で囲むことができる。

use std::fmt;

/// キーと値の組で構成される接続文字列
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionString {
    pairs: Vec<(String, String)>,
}

impl ConnectionString {
    /// 接続文字列をパース
    ///
    /// `=` を含まないセグメントがある場合は None を返す（URL形式などはこちらで扱わない）。
    pub fn parse(input: &str) -> Option<Self> {
        let mut pairs = Vec::new();

        for segment in split_segments(input) {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            let (key, value) = segment.split_once('=')?;
            let key = key.trim();
            let valid_key = key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '_');
            if key.is_empty() || !valid_key {
                return None;
            }

            pairs.push((key.to_string(), unquote(value.trim())));
        }

        if pairs.is_empty() {
            None
        } else {
            Some(Self { pairs })
        }
    }

    /// いずれかのキーに一致する最初の値を取得（大文字小文字は区別しない）
    pub fn get(&self, keys: &[&str]) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| keys.iter().any(|key| k.eq_ignore_ascii_case(key)))
            .map(|(_, v)| v.as_str())
    }

    /// いずれかのキーに一致する値を置き換え、なければ最初のキー名で追加する
    pub fn with_value(mut self, keys: &[&str], value: &str) -> Self {
        let mut replaced = false;
        self.pairs.retain_mut(|(k, v)| {
            if keys.iter().any(|key| k.eq_ignore_ascii_case(key)) {
                if replaced {
                    return false;
                }
                *v = value.to_string();
                replaced = true;
            }
            true
        });

        if !replaced {
            if let Some(key) = keys.first() {
                self.pairs.push((key.to_string(), value.to_string()));
            }
        }

        self
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, quote_if_needed(v)))
            .collect();
        write!(f, "{}", rendered.join(";"))
    }
}

/// 引用符内のセミコロンを区切りとして扱わずに分割
fn split_segments(input: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => {
                // 二重引用符によるエスケープ
                if chars.peek() == Some(&q) {
                    current.push(c);
                    current.push(c);
                    chars.next();
                } else {
                    quote = None;
                    current.push(c);
                }
            }
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' if current.trim_end().ends_with('=') => {
                    quote = Some(c);
                    current.push(c);
                }
                ';' => segments.push(std::mem::take(&mut current)),
                _ => current.push(c),
            },
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }

    segments
}

fn unquote(value: &str) -> String {
    for q in ['\'', '"'] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            let inner = &value[1..value.len() - 1];
            return inner.replace(&format!("{}{}", q, q), &q.to_string());
        }
    }
    value.to_string()
}

fn quote_if_needed(value: &str) -> String {
    if value.contains(';') || value.starts_with('\'') || value.starts_with('"') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
