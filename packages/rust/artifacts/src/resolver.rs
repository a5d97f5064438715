//! Deterministic artifact plan resolution.
//!
//! Pure function of document text, per-kind [`PlanMode`] and a
//! [`ClassifierRules`] set. No network, no model calls.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use archivist_shared::{
    ArchivistError, ArtifactKind, ArtifactPlan, BaseMode, DiagramType, PlanMode, PlanReason,
    Result,
};

use crate::rules::ClassifierRules;

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Markdown heading line; captures the heading text.
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}#{1,6}\s+(.+?)\s*#*\s*$").expect("heading regex"));

/// Separator between compared items: `vs`, `vs.`, `versus`.
static VS_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+(?:vs\.?|versus)\s+").expect("vs regex"));

/// `A 与 B 对比`. `和` / `跟` are too common in ordinary titles to split on.
static ZH_COMPARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\S+?)\s*与\s*(\S+?)\s*(?:的)?对比").expect("zh compare regex")
});

/// Table delimiter row with at least two columns.
static TABLE_SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\|?\s*:?-{3,}:?\s*(?:\|\s*:?-{3,}:?\s*)+\|?\s*$").expect("table separator regex")
});

/// Punctuation trimmed off the ends of a derived comparison item.
const ITEM_TRIM: &[char] = &[
    ':', '：', ',', '，', '.', '。', '!', '！', '?', '？', '(', ')', '（', '）', '"', '\'', '“',
    '”', '《', '》', '`', '*',
];

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolve the plan for one document.
///
/// Returns a `Classification` error only when `base` is forced `on`, the
/// comparison family applies and no comparison items can be derived.
pub fn resolve_plan(
    text: &str,
    canvas_mode: PlanMode,
    base_mode: PlanMode,
    rules: &ClassifierRules,
) -> Result<ArtifactPlan> {
    let haystack = text.to_lowercase();
    let mut plan = ArtifactPlan::primary_only();
    plan.rationale.push(PlanReason {
        kind: ArtifactKind::Note,
        included: true,
        detail: "primary document is always produced".into(),
    });

    // --- Diagram kind ---
    let canvas_trigger = first_match(
        &haystack,
        [
            &rules.canvas.sequence,
            &rules.canvas.flowchart,
            &rules.canvas.architecture,
            &rules.canvas.triggers,
        ],
    );
    let (include_canvas, canvas_detail) = gate(canvas_mode, canvas_trigger.map(quoted));
    if include_canvas {
        let diagram = diagram_type(&haystack, rules);
        plan.kinds.push(ArtifactKind::Canvas);
        plan.diagram_type = Some(diagram);
        plan.rationale.push(PlanReason {
            kind: ArtifactKind::Canvas,
            included: true,
            detail: format!("{canvas_detail}; template {}", diagram.as_str()),
        });
    } else {
        plan.rationale.push(PlanReason {
            kind: ArtifactKind::Canvas,
            included: false,
            detail: canvas_detail,
        });
    }

    // --- Tabular kind ---
    let comparison_phrase = first_match(&haystack, [&rules.base.comparison]);
    let heading_hit = comparison_heading(text);
    let comparison_intent = comparison_phrase.is_some() || heading_hit.is_some();

    let tables = count_markdown_tables(text);
    let table_signal = rules.table_signal_min > 0 && tables >= rules.table_signal_min;

    let base_trigger = comparison_phrase
        .map(quoted)
        .or_else(|| heading_hit.map(|h| format!("comparison heading '{h}'")))
        .or_else(|| {
            first_match(
                &haystack,
                [
                    &rules.base.checklist,
                    &rules.base.glossary,
                    &rules.base.triggers,
                ],
            )
            .map(quoted)
        })
        .or_else(|| table_signal.then(|| format!("{tables} markdown tables")));

    let (include_base, base_detail) = gate(base_mode, base_trigger);
    if !include_base {
        plan.rationale.push(PlanReason {
            kind: ArtifactKind::Base,
            included: false,
            detail: base_detail,
        });
        debug!(kinds = ?plan.kinds, "resolved artifact plan");
        return Ok(plan);
    }

    let mode = if comparison_intent {
        BaseMode::Comparison
    } else if first_match(&haystack, [&rules.base.checklist]).is_some() {
        BaseMode::Checklist
    } else if first_match(&haystack, [&rules.base.glossary]).is_some() {
        BaseMode::Glossary
    } else {
        BaseMode::Generic
    };

    if mode == BaseMode::Comparison {
        let items = comparison_items(text);
        if items.len() < 2 {
            if base_mode == PlanMode::On {
                return Err(ArchivistError::classification(
                    "comparison intent detected but no comparison items could be derived",
                ));
            }
            plan.rationale.push(PlanReason {
                kind: ArtifactKind::Base,
                included: false,
                detail: format!(
                    "{base_detail}; comparison intent without derivable items, tabular artifact omitted"
                ),
            });
            debug!(kinds = ?plan.kinds, "resolved artifact plan");
            return Ok(plan);
        }
        plan.comparison_items = items;
    }

    plan.kinds.push(ArtifactKind::Base);
    plan.base_mode = Some(mode);
    plan.rationale.push(PlanReason {
        kind: ArtifactKind::Base,
        included: true,
        detail: format!("{base_detail}; template {}", mode.as_str()),
    });

    debug!(
        kinds = ?plan.kinds,
        diagram = ?plan.diagram_type,
        base = ?plan.base_mode,
        items = plan.comparison_items.len(),
        "resolved artifact plan"
    );
    Ok(plan)
}

/// Apply a mode to an optional trigger description.
fn gate(mode: PlanMode, trigger: Option<String>) -> (bool, String) {
    match (mode, trigger) {
        (PlanMode::On, _) => (true, "mode on".into()),
        (PlanMode::Off, _) => (false, "mode off".into()),
        (PlanMode::Auto, Some(t)) => (true, format!("auto: matched {t}")),
        (PlanMode::Auto, None) => (false, "auto: no trigger matched".into()),
    }
}

fn quoted(phrase: &str) -> String {
    format!("phrase '{phrase}'")
}

/// First phrase (in list order, then phrase order) contained in `haystack`.
fn first_match<'a, const N: usize>(haystack: &str, lists: [&'a Vec<String>; N]) -> Option<&'a str> {
    lists
        .into_iter()
        .flatten()
        .find(|p| {
            let needle = p.trim().to_lowercase();
            !needle.is_empty() && haystack.contains(&needle)
        })
        .map(String::as_str)
}

fn diagram_type(haystack: &str, rules: &ClassifierRules) -> DiagramType {
    if first_match(haystack, [&rules.canvas.sequence]).is_some() {
        DiagramType::Sequence
    } else if first_match(haystack, [&rules.canvas.flowchart]).is_some() {
        DiagramType::Flowchart
    } else if first_match(haystack, [&rules.canvas.architecture]).is_some() {
        DiagramType::Architecture
    } else {
        DiagramType::Mindmap
    }
}

// ---------------------------------------------------------------------------
// Comparison items
// ---------------------------------------------------------------------------

fn headings(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .filter_map(|line| HEADING_RE.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}

/// First heading that phrases a comparison (`A vs B`, `A 与 B 对比`).
fn comparison_heading(text: &str) -> Option<&str> {
    headings(text).find(|h| !heading_items(h).is_empty())
}

fn heading_items(heading: &str) -> Vec<String> {
    let parts: Vec<&str> = VS_SPLIT_RE.split(heading).collect();
    if parts.len() >= 2 {
        let items: Vec<String> = parts
            .iter()
            .enumerate()
            .filter_map(|(i, part)| {
                let words: Vec<&str> = part.split_whitespace().collect();
                let word = if i == 0 { words.last() } else { words.first() }?;
                clean_item(word)
            })
            .collect();
        if items.len() >= 2 {
            return items;
        }
    }

    if let Some(caps) = ZH_COMPARE_RE.captures(heading) {
        let items: Vec<String> = [caps.get(1), caps.get(2)]
            .into_iter()
            .flatten()
            .filter_map(|m| clean_item(m.as_str()))
            .collect();
        if items.len() == 2 {
            return items;
        }
    }
    Vec::new()
}

fn clean_item(raw: &str) -> Option<String> {
    let item = raw.trim().trim_matches(ITEM_TRIM).trim();
    (!item.is_empty()).then(|| item.to_string())
}

/// Header cells of the first Markdown table, minus the row-label column.
fn table_items(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    for (i, line) in lines.iter().enumerate().skip(1) {
        if !TABLE_SEPARATOR_RE.is_match(line) || !lines[i - 1].contains('|') {
            continue;
        }
        let cells: Vec<&str> = lines[i - 1]
            .trim()
            .trim_matches('|')
            .split('|')
            .map(str::trim)
            .collect();
        if cells.len() < 3 {
            return Vec::new();
        }
        return cells[1..].iter().filter_map(|c| clean_item(c)).collect();
    }
    Vec::new()
}

/// Derive comparison item identifiers from the document.
///
/// Headings are preferred over the first table's header row. Items are
/// deduplicated case-insensitively; fewer than two means none.
pub fn comparison_items(text: &str) -> Vec<String> {
    let mut candidates: Vec<String> = headings(text).flat_map(heading_items).collect();
    if candidates.len() < 2 {
        candidates = table_items(text);
    }

    let mut seen = HashSet::new();
    let items: Vec<String> = candidates
        .into_iter()
        .filter(|item| seen.insert(item.to_lowercase()))
        .collect();

    if items.len() < 2 { Vec::new() } else { items }
}

/// Number of Markdown tables (a header row followed by a delimiter row).
pub fn count_markdown_tables(text: &str) -> usize {
    let lines: Vec<&str> = text.lines().collect();
    lines
        .windows(2)
        .filter(|w| w[0].contains('|') && TABLE_SEPARATOR_RE.is_match(w[1]))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auto(text: &str) -> ArtifactPlan {
        resolve_plan(text, PlanMode::Auto, PlanMode::Auto, &ClassifierRules::default()).unwrap()
    }

    #[test]
    fn primary_kind_always_present() {
        for (c, b) in [
            (PlanMode::Off, PlanMode::Off),
            (PlanMode::On, PlanMode::Off),
            (PlanMode::Auto, PlanMode::Auto),
        ] {
            let plan = resolve_plan("plain text", c, b, &ClassifierRules::default()).unwrap();
            assert_eq!(plan.kinds[0], ArtifactKind::Note);
        }
    }

    #[test]
    fn tool_list_does_not_trigger_base() {
        let plan = auto("# 推荐\n\n这是一份工具列表，收录了常用的开发工具列表。");
        assert_eq!(plan.kinds, vec![ArtifactKind::Note]);
        assert!(plan.base_mode.is_none());
    }

    #[test]
    fn generic_words_do_not_trigger() {
        let plan = auto("Summary\n\nHere is a list of key points. 总结一下要点。");
        assert_eq!(plan.kinds, vec![ArtifactKind::Note]);
    }

    #[test]
    fn off_mode_never_includes() {
        let plan = resolve_plan(
            "本文给出一张时序图和一份检查清单",
            PlanMode::Off,
            PlanMode::Off,
            &ClassifierRules::default(),
        )
        .unwrap();
        assert_eq!(plan.kinds, vec![ArtifactKind::Note]);
        assert!(plan.rationale.iter().any(|r| r.detail == "mode off"));
    }

    #[test]
    fn on_mode_uses_default_submodes() {
        let plan = resolve_plan(
            "nothing special",
            PlanMode::On,
            PlanMode::On,
            &ClassifierRules::default(),
        )
        .unwrap();
        assert_eq!(
            plan.kinds,
            vec![ArtifactKind::Note, ArtifactKind::Canvas, ArtifactKind::Base]
        );
        assert_eq!(plan.diagram_type, Some(DiagramType::Mindmap));
        assert_eq!(plan.base_mode, Some(BaseMode::Generic));
    }

    #[test]
    fn diagram_submode_priority() {
        let plan = auto("先看架构图，再看时序图，最后是流程图。");
        assert_eq!(plan.diagram_type, Some(DiagramType::Sequence));

        let plan = auto("The flowchart below and the system architecture overview.");
        assert_eq!(plan.diagram_type, Some(DiagramType::Flowchart));

        let plan = auto("下面是一张思维导图");
        assert_eq!(plan.diagram_type, Some(DiagramType::Mindmap));
    }

    #[test]
    fn base_checklist_and_glossary() {
        let plan = auto("附一份上线前的检查清单，以及术语表。");
        assert_eq!(plan.base_mode, Some(BaseMode::Checklist));

        let plan = auto("文末附名词解释。");
        assert_eq!(plan.base_mode, Some(BaseMode::Glossary));
    }

    #[test]
    fn comparison_with_heading_items() {
        let text = "# 框架选型\n\n## React vs Vue vs Svelte\n\n我们做一个横向对比。";
        let plan = auto(text);
        assert_eq!(plan.base_mode, Some(BaseMode::Comparison));
        assert_eq!(plan.comparison_items, vec!["React", "Vue", "Svelte"]);
    }

    #[test]
    fn comparison_from_zh_heading() {
        let plan = auto("## Rust 与 Go 对比\n\n正文");
        assert_eq!(plan.base_mode, Some(BaseMode::Comparison));
        assert_eq!(plan.comparison_items, vec!["Rust", "Go"]);
    }

    #[test]
    fn plain_conjunctions_are_not_comparisons() {
        assert!(comparison_items("## Rust 和 Go 的故事\n\n正文").is_empty());
        assert!(comparison_items("## Rust 和 Go 的对比\n\n正文").is_empty());
        assert!(comparison_items("## 我跟同事的对比实验\n\n正文").is_empty());
        assert_eq!(comparison_items("## Rust 与 Go 的对比\n"), vec!["Rust", "Go"]);
    }

    #[test]
    fn comparison_from_table_header() {
        let text = "本文做对比分析。\n\n| 维度 | PostgreSQL | MySQL |\n|---|---|---|\n| 事务 | 强 | 强 |\n";
        let plan = auto(text);
        assert_eq!(plan.base_mode, Some(BaseMode::Comparison));
        assert_eq!(plan.comparison_items, vec!["PostgreSQL", "MySQL"]);
    }

    #[test]
    fn comparison_without_items_omits_base_in_auto() {
        let plan = auto("这是一篇对比分析文章，但没有给出具体对象。");
        assert!(!plan.includes(ArtifactKind::Base));
        assert!(plan.base_mode.is_none());
        let reason = plan
            .rationale
            .iter()
            .find(|r| r.kind == ArtifactKind::Base)
            .unwrap();
        assert!(!reason.included);
        assert!(reason.detail.contains("without derivable items"));
    }

    #[test]
    fn comparison_without_items_errors_in_on_mode() {
        let err = resolve_plan(
            "这是一篇对比分析文章。",
            PlanMode::Off,
            PlanMode::On,
            &ClassifierRules::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ArchivistError::Classification { .. }));
    }

    #[test]
    fn table_signal_triggers_generic_base() {
        let table = "| a | b |\n|---|---|\n| 1 | 2 |\n\n";
        let text = table.repeat(3);
        assert_eq!(count_markdown_tables(&text), 3);
        let plan = auto(&text);
        assert_eq!(plan.base_mode, Some(BaseMode::Generic));

        let plan = auto(&table.repeat(2));
        assert!(!plan.includes(ArtifactKind::Base));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let plan = auto("A short CHECKLIST for releases");
        assert_eq!(plan.base_mode, Some(BaseMode::Checklist));
    }

    #[test]
    fn items_are_deduplicated() {
        let items = comparison_items("## Rust vs Go\n\n## rust VS go\n");
        assert_eq!(items, vec!["Rust", "Go"]);
    }

    #[test]
    fn rationale_names_the_phrase() {
        let plan = auto("这里有一张时序图");
        let canvas = plan
            .rationale
            .iter()
            .find(|r| r.kind == ArtifactKind::Canvas)
            .unwrap();
        assert!(canvas.included);
        assert!(canvas.detail.contains("时序图"));
        assert!(canvas.detail.contains("sequence"));
    }
}
