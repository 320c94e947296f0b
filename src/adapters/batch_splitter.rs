// バッチ区切りパーサー
//
// SQL Server のスクリプトを `GO` 行で個別のバッチに分割します。
// `GO` は単独の行（前後の空白と行末コメントは許可、大文字小文字は区別しない）で、
// 任意で繰り返し回数 `GO 3` を指定できます。
// 文字列リテラル、角括弧識別子、ダブルクォート識別子、コメント内の `GO` は
// 区切りとして扱いません。

use regex::Regex;
use std::sync::OnceLock;

fn separator_regex() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| {
        Regex::new(r"(?i)^\s*GO(?:\s+(\d+))?\s*(?:--.*)?$").expect("valid separator regex")
    })
}

/// スクリプトをバッチに分割
///
/// 繰り返し指定のあるバッチは指定回数だけ展開されます。
/// 空白やコメントのみのバッチは除外されます。
///
/// # Arguments
///
/// * `sql` - 分割するスクリプト
///
/// # Returns
///
/// 実行順のバッチのベクター（前後の空白はトリム済み）
pub fn split_batches(sql: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();
    let mut state = ParseState::Normal;

    for line in sql.split_inclusive('\n') {
        // 行頭が通常状態のときだけ区切り行を判定する
        if matches!(state, ParseState::Normal) {
            let content = line.trim_end_matches(['\r', '\n']);
            if let Some(caps) = separator_regex().captures(content) {
                let repeat = caps
                    .get(1)
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                    .unwrap_or(1);
                push_batch(&mut batches, &current, repeat);
                current.clear();
                continue;
            }
        }

        state = scan_line(line, state);
        current.push_str(line);
    }

    push_batch(&mut batches, &current, 1);
    batches
}

fn push_batch(batches: &mut Vec<String>, batch: &str, repeat: usize) {
    let trimmed = batch.trim();
    if trimmed.is_empty() || is_comment_only(trimmed) {
        return;
    }
    for _ in 0..repeat {
        batches.push(trimmed.to_string());
    }
}

/// パーサーの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    Bracketed,
    /// ブロックコメント（ネスト深さを保持。T-SQLのネストされたコメントに対応）
    BlockComment(u32),
}

/// 1行を走査し、行末時点の状態を返す
fn scan_line(line: &str, mut state: ParseState) -> ParseState {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match state {
            ParseState::SingleQuoted => {
                if c == '\'' {
                    if next == Some('\'') {
                        // エスケープされたシングルクォート('')
                        i += 2;
                        continue;
                    }
                    state = ParseState::Normal;
                }
            }
            ParseState::DoubleQuoted => {
                if c == '"' {
                    if next == Some('"') {
                        i += 2;
                        continue;
                    }
                    state = ParseState::Normal;
                }
            }
            ParseState::Bracketed => {
                if c == ']' {
                    if next == Some(']') {
                        // エスケープされた閉じ括弧(]])
                        i += 2;
                        continue;
                    }
                    state = ParseState::Normal;
                }
            }
            ParseState::BlockComment(depth) => {
                if c == '/' && next == Some('*') {
                    state = ParseState::BlockComment(depth + 1);
                    i += 2;
                    continue;
                }
                if c == '*' && next == Some('/') {
                    state = if depth == 1 {
                        ParseState::Normal
                    } else {
                        ParseState::BlockComment(depth - 1)
                    };
                    i += 2;
                    continue;
                }
            }
            ParseState::Normal => match c {
                '\'' => state = ParseState::SingleQuoted,
                '"' => state = ParseState::DoubleQuoted,
                '[' => state = ParseState::Bracketed,
                // 行コメントは行末で終わるので残りを読み飛ばす
                '-' if next == Some('-') => return state,
                '/' if next == Some('*') => {
                    state = ParseState::BlockComment(1);
                    i += 2;
                    continue;
                }
                _ => {}
            },
        }

        i += 1;
    }

    state
}

/// バッチがコメントのみで構成されているかを判定
fn is_comment_only(s: &str) -> bool {
    let mut remaining = s.trim();

    loop {
        if remaining.is_empty() {
            return true;
        }

        if remaining.starts_with("--") {
            match remaining.find('\n') {
                Some(pos) => remaining = remaining[pos + 1..].trim(),
                None => return true,
            }
        } else if remaining.starts_with("/*") {
            let mut depth: u32 = 1;
            let chars: Vec<char> = remaining.chars().collect();
            let mut i = 2;
            while i < chars.len() && depth > 0 {
                if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
                    depth += 1;
                    i += 2;
                } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                    depth -= 1;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            if depth > 0 {
                return true;
            }
            let byte_offset: usize = chars[..i].iter().map(|c| c.len_utf8()).sum();
            remaining = remaining[byte_offset..].trim();
        } else {
            return false;
        }
    }
}
