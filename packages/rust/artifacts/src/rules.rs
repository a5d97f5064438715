//! Phrase lists driving the `auto` mode of the plan resolver.
//!
//! The lists are data, not code: they ship with curated defaults and can be
//! replaced from a TOML file. Every list is checked by
//! [`ClassifierRules::validate`] so a rule file cannot reintroduce generic
//! single-word triggers.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use archivist_shared::{ArchivistError, Result};

/// Words that appear in too many ordinary documents to be a trigger.
///
/// Matching is on the whole trimmed phrase, case-insensitive.
pub const GENERIC_DENY_LIST: &[&str] = &[
    "summary",
    "list",
    "lists",
    "key points",
    "overview",
    "table",
    "tables",
    "compare",
    "comparison",
    "step",
    "steps",
    "process",
    "diagram",
    "tool",
    "tools",
    "总结",
    "列表",
    "要点",
    "工具",
    "清单",
    "对比",
    "比较",
    "表格",
    "步骤",
    "流程",
    "架构",
    "概述",
    "图",
];

/// Shortest single ASCII word accepted as a trigger.
const MIN_ASCII_WORD_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Rule types
// ---------------------------------------------------------------------------

/// Full rule set for both optional kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierRules {
    pub canvas: CanvasRules,
    pub base: BaseRules,
    /// Markdown tables needed before the structural base signal fires. 0 disables it.
    pub table_signal_min: usize,
}

/// Diagram artifact phrases. Sub-mode lists are checked in field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasRules {
    /// Phrases that request a diagram without implying a template family.
    pub triggers: Vec<String>,
    pub sequence: Vec<String>,
    pub flowchart: Vec<String>,
    pub architecture: Vec<String>,
}

/// Tabular artifact phrases. Sub-mode lists are checked in field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseRules {
    pub triggers: Vec<String>,
    pub comparison: Vec<String>,
    pub checklist: Vec<String>,
    pub glossary: Vec<String>,
}

fn phrases(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            canvas: CanvasRules::default(),
            base: BaseRules::default(),
            table_signal_min: 3,
        }
    }
}

impl Default for CanvasRules {
    fn default() -> Self {
        Self {
            triggers: phrases(&[
                "思维导图",
                "知识图谱",
                "概念图",
                "脑图",
                "mind map",
                "mindmap",
                "concept map",
            ]),
            sequence: phrases(&[
                "时序图",
                "序列图",
                "调用链路",
                "交互时序",
                "sequence diagram",
                "call chain",
            ]),
            flowchart: phrases(&[
                "流程图",
                "执行流程",
                "操作步骤",
                "决策树",
                "flowchart",
                "flow chart",
                "decision tree",
            ]),
            architecture: phrases(&[
                "架构图",
                "系统架构",
                "整体架构",
                "模块依赖",
                "architecture diagram",
                "system architecture",
            ]),
        }
    }
}

impl Default for BaseRules {
    fn default() -> Self {
        Self {
            triggers: phrases(&[
                "数据表",
                "对照表",
                "一览表",
                "汇总表",
                "spreadsheet",
                "data table",
            ]),
            comparison: phrases(&[
                "对比分析",
                "横向对比",
                "优缺点对比",
                "优劣对比",
                "选型对比",
                "pros and cons",
                "comparison table",
                "head-to-head",
            ]),
            checklist: phrases(&[
                "检查清单",
                "核对清单",
                "自查清单",
                "checklist",
                "check list",
            ]),
            glossary: phrases(&["术语表", "名词解释", "词汇表", "glossary"]),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl ClassifierRules {
    /// Load a rule file and validate it.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ArchivistError::io(path, e))?;
        let rules: Self = toml::from_str(&content).map_err(|e| {
            ArchivistError::config(format!("invalid rule file {}: {e}", path.display()))
        })?;
        rules.validate()?;
        info!(path = %path.display(), "loaded classifier rules");
        Ok(rules)
    }

    /// Reject generic words, short bare ASCII words and empty phrases in every list.
    pub fn validate(&self) -> Result<()> {
        let lists: [(&str, &[String]); 8] = [
            ("canvas.triggers", &self.canvas.triggers),
            ("canvas.sequence", &self.canvas.sequence),
            ("canvas.flowchart", &self.canvas.flowchart),
            ("canvas.architecture", &self.canvas.architecture),
            ("base.triggers", &self.base.triggers),
            ("base.comparison", &self.base.comparison),
            ("base.checklist", &self.base.checklist),
            ("base.glossary", &self.base.glossary),
        ];

        for (list, items) in lists {
            for phrase in items {
                if let Some(problem) = phrase_problem(phrase) {
                    return Err(ArchivistError::validation(format!(
                        "classifier rule {list}: '{phrase}' {problem}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn phrase_problem(phrase: &str) -> Option<&'static str> {
    let p = phrase.trim().to_lowercase();
    if p.is_empty() {
        return Some("is empty");
    }
    if GENERIC_DENY_LIST.contains(&p.as_str()) {
        return Some("is too generic to be a trigger");
    }
    let single_word = !p.contains(char::is_whitespace);
    if single_word && p.is_ascii() && p.chars().count() < MIN_ASCII_WORD_LEN {
        return Some("is too short to be a specific term");
    }
    if !p.is_ascii() && p.chars().count() < 2 {
        return Some("is a single character");
    }
    None
}

/// Load rules from `path`, or fall back to the built-in defaults.
pub fn load_rules(path: Option<&Path>) -> Result<ClassifierRules> {
    match path {
        Some(p) => ClassifierRules::from_toml_file(p),
        None => Ok(ClassifierRules::default()),
    }
}
