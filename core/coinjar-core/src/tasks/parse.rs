//! Free-text task entry.
//!
//! Accepted shapes, blocks separated by blank lines:
//!
//! ```text
//! 買い物: 牛乳を買う          title + inline detail (":", "：", "|", "｜")
//!
//! 部屋の掃除                  title line, continuation lines become detail
//!   - 机
//!   - 床
//!
//! - 洗濯                      bullet list, one task per unindented bullet,
//! - 料理: カレー                indented lines continue the previous bullet
//!     玉ねぎを炒める
//! ```
//!
//! Parsing is pure and deterministic.

use once_cell::sync::Lazy;
use regex::Regex;

use super::PendingTask;

static BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*+•・]|\d{1,3}[.)])\s+").unwrap());

static TITLE_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(?::\s+|[：|｜])\s*").unwrap());

pub fn parse_tasks(text: &str) -> Vec<PendingTask> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut tasks = Vec::new();
    for block in blocks(&normalized) {
        if is_top_level_bullet(block[0]) {
            parse_list(&block, &mut tasks);
        } else {
            tasks.extend(parse_paragraph(&block));
        }
    }

    if tasks.is_empty() {
        if let Some(task) = fallback(&normalized) {
            tasks.push(task);
        }
    }
    tasks
}

fn blocks(text: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn is_indented(line: &str) -> bool {
    line.starts_with(|c: char| c.is_whitespace())
}

fn is_top_level_bullet(line: &str) -> bool {
    !is_indented(line) && BULLET.is_match(line)
}

fn strip_bullet(line: &str) -> &str {
    match BULLET.find(line) {
        Some(found) => line[found.end()..].trim(),
        None => line.trim(),
    }
}

/// Splits `title: detail` at the first separator.
fn split_title(line: &str) -> (&str, Option<&str>) {
    match TITLE_SEPARATOR.find(line) {
        Some(found) => {
            let detail = line[found.end()..].trim();
            (
                line[..found.start()].trim(),
                (!detail.is_empty()).then_some(detail),
            )
        }
        None => (line.trim(), None),
    }
}

fn join_detail(inline: Option<&str>, rest: &[&str]) -> Option<String> {
    let parts: Vec<&str> = inline
        .into_iter()
        .chain(rest.iter().copied())
        .filter(|part| !part.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n"))
}

fn parse_paragraph(block: &[&str]) -> Option<PendingTask> {
    let (title, inline) = split_title(block[0]);
    let rest: Vec<&str> = block[1..].iter().map(|line| strip_bullet(line)).collect();
    PendingTask::new(title, join_detail(inline, &rest).as_deref())
}

fn parse_list(block: &[&str], tasks: &mut Vec<PendingTask>) {
    let mut head: Option<&str> = None;
    let mut rest: Vec<&str> = Vec::new();
    for line in block {
        if is_top_level_bullet(line) {
            push_list_item(head.take(), &mut rest, tasks);
            head = Some(strip_bullet(line));
        } else {
            rest.push(strip_bullet(line));
        }
    }
    push_list_item(head, &mut rest, tasks);
}

fn push_list_item(head: Option<&str>, rest: &mut Vec<&str>, tasks: &mut Vec<PendingTask>) {
    if let Some(line) = head {
        let (title, inline) = split_title(line);
        if let Some(task) = PendingTask::new(title, join_detail(inline, rest).as_deref()) {
            tasks.push(task);
        }
    }
    rest.clear();
}

fn fallback(text: &str) -> Option<PendingTask> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut lines = trimmed.lines();
    let title = lines.next().unwrap_or_default();
    let rest: Vec<&str> = lines.map(str::trim).collect();
    PendingTask::new(title, join_detail(None, &rest).as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(title: &str, detail: Option<&str>) -> PendingTask {
        PendingTask::new(title, detail).unwrap()
    }

    #[test]
    fn blank_line_separates_tasks() {
        assert_eq!(
            parse_tasks("買い物: 牛乳を買う\n\n次のタスク"),
            vec![task("買い物", Some("牛乳を買う")), task("次のタスク", None)]
        );
    }

    #[test]
    fn all_separators_split_title() {
        for input in ["a: b", "a：b", "a | b", "a｜b"] {
            assert_eq!(parse_tasks(input), vec![task("a", Some("b"))], "{input}");
        }
    }

    #[test]
    fn colon_without_space_is_not_a_separator() {
        assert_eq!(
            parse_tasks("see https://example.test/x"),
            vec![task("see https://example.test/x", None)]
        );
    }

    #[test]
    fn continuation_lines_become_detail() {
        assert_eq!(
            parse_tasks("部屋の掃除\n  - 机\n  - 床"),
            vec![task("部屋の掃除", Some("机\n床"))]
        );
    }

    #[test]
    fn paragraph_without_markers() {
        assert_eq!(
            parse_tasks("読書\n三章まで読んだ\nメモを取った"),
            vec![task("読書", Some("三章まで読んだ\nメモを取った"))]
        );
    }

    #[test]
    fn inline_detail_and_continuation_are_joined() {
        assert_eq!(
            parse_tasks("料理: カレー\n玉ねぎを炒める"),
            vec![task("料理", Some("カレー\n玉ねぎを炒める"))]
        );
    }

    #[test]
    fn bullet_list_yields_one_task_per_bullet() {
        assert_eq!(
            parse_tasks("- 洗濯\n- 料理: カレー\n    玉ねぎを炒める\n* 散歩"),
            vec![
                task("洗濯", None),
                task("料理", Some("カレー\n玉ねぎを炒める")),
                task("散歩", None),
            ]
        );
    }

    #[test]
    fn numbered_list_is_a_list() {
        assert_eq!(
            parse_tasks("1. first\n2) second"),
            vec![task("first", None), task("second", None)]
        );
    }

    #[test]
    fn crlf_input() {
        assert_eq!(
            parse_tasks("a\r\n\r\nb"),
            vec![task("a", None), task("b", None)]
        );
    }

    #[test]
    fn separator_only_falls_back_to_raw_text() {
        assert_eq!(parse_tasks(" | "), vec![task("|", None)]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(parse_tasks("").is_empty());
        assert!(parse_tasks("\n  \n").is_empty());
    }

    #[test]
    fn parsing_is_deterministic() {
        let input = "- a\n  b\n\nc: d";
        assert_eq!(parse_tasks(input), parse_tasks(input));
    }
}
