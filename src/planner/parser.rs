//! Parsers for the markdown artifacts the planning pipeline produces:
//! spec.md, plan.md, tasks.md, and clarification question lists.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static USER_STORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^##\s*User Story:?\s*(.+)$").expect("valid regex"));

static TASK_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*]\s+\[[ xX]?\]\s*(.+)$").expect("valid regex"));

static PARALLEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[P\]").expect("valid regex"));

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^##\s*(User Story|Phase|Story):?\s*(.+)$").expect("valid regex")
});

static FILE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("`([^`]+\\.[a-zA-Z]+)`").expect("valid regex"));

static QUESTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\d+\.\s+(.+\?)").expect("valid regex"));

/// Parsed spec.md content.
#[derive(Debug, Clone)]
pub struct SpecDoc {
    pub title: String,
    pub user_stories: Vec<UserStory>,
    pub raw: String,
}

#[derive(Debug, Clone)]
pub struct UserStory {
    pub id: String,
    pub title: String,
}

/// Parsed plan.md content.
#[derive(Debug, Clone)]
pub struct PlanDoc {
    pub tech_stack: Vec<String>,
    pub raw: String,
}

/// One checklist entry from tasks.md.
#[derive(Debug, Clone)]
pub struct TaskItem {
    pub id: String,
    pub title: String,
    pub user_story: String,
    pub file_paths: Vec<String>,
    pub is_parallel: bool,
    pub is_test: bool,
    pub order: usize,
}

/// A clarification question awaiting an operator answer.
#[derive(Debug, Clone)]
pub struct Question {
    pub id: String,
    pub question: String,
}

impl Question {
    pub fn new(id: &str, question: &str) -> Self {
        Self {
            id: id.to_string(),
            question: question.to_string(),
        }
    }
}

/// Read and parse `spec.md` from a feature directory.
pub fn parse_spec(feature_dir: &Path) -> Result<SpecDoc> {
    let path = feature_dir.join("spec.md");
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let title = content
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .unwrap_or_default()
        .to_string();

    let user_stories = USER_STORY_RE
        .captures_iter(&content)
        .enumerate()
        .map(|(i, cap)| UserStory {
            id: format!("US-{}", i + 1),
            title: cap[1].trim().to_string(),
        })
        .collect();

    Ok(SpecDoc {
        title,
        user_stories,
        raw: content,
    })
}

/// Read and parse `plan.md` from a feature directory.
pub fn parse_plan(feature_dir: &Path) -> Result<PlanDoc> {
    let path = feature_dir.join("plan.md");
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut tech_stack = Vec::new();
    let mut in_tech_stack = false;
    for line in content.lines() {
        let lower = line.to_lowercase();
        if lower.contains("tech stack") || lower.contains("technology") {
            in_tech_stack = true;
            continue;
        }
        if in_tech_stack && line.starts_with("##") {
            in_tech_stack = false;
        }
        if in_tech_stack && let Some(item) = line.strip_prefix("- ") {
            tech_stack.push(item.to_string());
        }
    }

    Ok(PlanDoc {
        tech_stack,
        raw: content,
    })
}

/// Read and parse `tasks.md` from a feature directory.
///
/// Tasks are markdown checklist lines; a `[P]` marker flags a task as safe
/// to run in parallel, backticked file names are collected, and `## User
/// Story` / `## Phase` headings group the tasks that follow them.
pub fn parse_tasks(feature_dir: &Path) -> Result<Vec<TaskItem>> {
    let path = feature_dir.join("tasks.md");
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut tasks = Vec::new();
    let mut current_story = String::new();
    let mut order = 0;

    for line in content.lines() {
        if let Some(cap) = SECTION_RE.captures(line) {
            current_story = cap[2].trim().to_string();
            continue;
        }

        let Some(cap) = TASK_LINE_RE.captures(line) else {
            continue;
        };
        order += 1;
        let raw_title = cap[1].trim();

        let is_parallel = PARALLEL_RE.is_match(raw_title);
        let title = PARALLEL_RE.replace_all(raw_title, "").trim().to_string();
        let is_test = title.to_lowercase().contains("test");

        let file_paths = FILE_PATH_RE
            .captures_iter(&title)
            .map(|c| c[1].to_string())
            .collect();

        tasks.push(TaskItem {
            id: format!("T-{order:03}"),
            title,
            user_story: current_story.clone(),
            file_paths,
            is_parallel,
            is_test,
            order,
        });
    }

    Ok(tasks)
}

/// Extract numbered questions from clarify output.
pub fn parse_clarifications(output: &str) -> Vec<Question> {
    QUESTION_RE
        .captures_iter(output)
        .enumerate()
        .map(|(i, cap)| Question::new(&format!("Q{}", i + 1), cap[1].trim()))
        .collect()
}

impl SpecDoc {
    /// Brief operator-facing summary.
    pub fn summary(&self) -> String {
        let mut summary = format!("{}\n\n", self.title);
        if !self.user_stories.is_empty() {
            summary.push_str(&format!("User stories: {}\n", self.user_stories.len()));
            for story in &self.user_stories {
                summary.push_str(&format!("  - {}\n", crate::util::truncate(&story.title, 50)));
            }
        }
        summary
    }
}

impl PlanDoc {
    /// Brief operator-facing summary.
    pub fn summary(&self) -> String {
        let mut summary = String::from("Implementation plan\n\n");
        if !self.tech_stack.is_empty() {
            summary.push_str("Tech stack:\n");
            for tech in &self.tech_stack {
                summary.push_str(&format!("  - {tech}\n"));
            }
        }
        summary
    }
}
