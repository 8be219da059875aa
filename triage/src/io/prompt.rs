//! Prompt builder for oracle invocations.
//!
//! The template marks each section with `<!-- section:KEY required|droppable -->`.
//! When the rendered prompt exceeds the byte budget, droppable sections go
//! first, then the oldest ticket lines are omitted until the prompt fits.

use std::borrow::Cow;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::{debug, warn};

const RESOLVE_TEMPLATE: &str = include_str!("prompts/resolve.md");

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 1] = ["scratchpad"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
});

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("resolve", RESOLVE_TEMPLATE)
            .context("compile resolve template")?;
        Ok(Self { env })
    }

    fn render(&self, input: &PromptInputs, tickets: &str) -> Result<String> {
        let template = self.env.get_template("resolve")?;
        let rendered = template
            .render(context! {
                message => defuse_markers(input.message.trim()),
                tickets => defuse_markers(tickets.trim()),
                scratchpad => input
                    .scratchpad
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(defuse_markers),
            })
            .context("render resolve template")?;
        Ok(rendered)
    }
}

/// Rewrite section markers inside user or oracle text so they stay content.
fn defuse_markers(text: &str) -> Cow<'_, str> {
    SECTION_RE.replace_all(text, "<!-- section $1 $2 -->")
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    /// Section content after the marker, including its header.
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in matches.iter().enumerate() {
        let (Some(marker), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let content = rendered[marker.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

/// Length of [`render_sections`] output, separators included.
fn total_len(sections: &[ParsedSection]) -> usize {
    let separators = sections.len().saturating_sub(1) * 2;
    sections.iter().map(|s| s.content.len()).sum::<usize>() + separators
}

fn drop_sections_for_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Ticket lines with the `omitted` oldest replaced by a single marker line.
fn ticket_block(lines: &[&str], omitted: usize) -> String {
    let kept = &lines[omitted.min(lines.len())..];
    let mut block = Vec::with_capacity(kept.len() + 1);
    let marker = format!("[{omitted} older tickets omitted]");
    if omitted > 0 {
        block.push(marker.as_str());
    }
    block.extend_from_slice(kept);
    block.join("\n")
}

/// All inputs needed to build one oracle prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs {
    /// The incoming message being routed.
    pub message: String,
    /// Rendered context snapshot, one ticket per line.
    pub tickets: String,
    /// Earlier completions of this invocation and their observations.
    pub scratchpad: Option<String>,
}

/// Builds a prompt within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, input: &PromptInputs) -> Result<String> {
        let engine = PromptEngine::new()?;
        let lines: Vec<&str> = input.tickets.lines().collect();
        let mut omitted = 0usize;

        loop {
            let rendered = engine.render(input, &ticket_block(&lines, omitted))?;
            let mut sections = parse_sections(&rendered);
            drop_sections_for_budget(&mut sections, self.budget_bytes);
            let total = total_len(&sections);
            if total <= self.budget_bytes || omitted >= lines.len() {
                if total > self.budget_bytes {
                    warn!(
                        total,
                        budget = self.budget_bytes,
                        "prompt exceeds budget with all tickets omitted"
                    );
                }
                if omitted > 0 {
                    debug!(omitted, "omitted older tickets for budget");
                }
                return Ok(render_sections(&sections));
            }

            // Skip ahead by roughly the overflow, then re-check.
            let mut overflow = total - self.budget_bytes;
            let mut step = 0usize;
            for line in &lines[omitted..] {
                step += 1;
                if line.len() + 1 >= overflow {
                    break;
                }
                overflow -= line.len() + 1;
            }
            omitted += step.max(1);
        }
    }
}
