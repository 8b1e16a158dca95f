//! Report synthesis from aggregated evidence.

use async_trait::async_trait;

use crate::agents::{AgentResponse, Capability};
use crate::anthropic::{MessageSender, MessagesRequest};
use crate::error::{RcaError, Result};

/// Longest evidence excerpt quoted into a prompt or digest.
const MAX_EXCERPT_CHARS: usize = 400;

/// Turns the successful agent responses for a query into narrative text.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    /// `evidence` only contains successful responses, in capability order.
    async fn generate(&self, query: &str, evidence: &[AgentResponse]) -> Result<String>;
}

/// Asks an LLM for a root cause analysis with mitigation steps.
pub struct LlmReportGenerator<C> {
    client: C,
    model: String,
    max_tokens: u32,
}

impl<C: MessageSender> LlmReportGenerator<C> {
    pub fn new(client: C, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: 2000,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Prompt body: the query followed by one findings section per capability
/// that was consulted. Capabilities that were not consulted are marked so the
/// model does not invent data for them.
pub fn build_prompt(query: &str, evidence: &[AgentResponse]) -> String {
    let mut sections = Vec::new();
    for capability in Capability::ALL {
        let section = match evidence.iter().find(|r| r.capability == capability) {
            Some(resp) if resp.evidence.is_empty() => {
                format!("## {}\nNo matching records found.", capability.label())
            }
            Some(resp) => {
                let items: Vec<String> = resp
                    .evidence
                    .iter()
                    .map(|e| match &e.source {
                        Some(src) => format!("- [{src}] {}", excerpt(&e.text)),
                        None => format!("- {}", excerpt(&e.text)),
                    })
                    .collect();
                format!("## {}\n{}", capability.label(), items.join("\n"))
            }
            None => format!("## {}\nNot consulted for this query.", capability.label()),
        };
        sections.push(section);
    }

    format!(
        "You are a reliability engineer writing a root cause analysis.\n\
         \n\
         Question: {query}\n\
         \n\
         Findings:\n\
         {findings}\n\
         \n\
         Write a concise report with these sections:\n\
         1. Summary of the issue\n\
         2. Evidence (cite record ids where given)\n\
         3. Probable root causes, most likely first\n\
         4. Mitigation: immediate actions (0-24 hours), short-term fixes (1-7 days), long-term prevention\n\
         Only use the findings above; say so when the evidence is insufficient.",
        findings = sections.join("\n\n"),
    )
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_EXCERPT_CHARS).collect();
    format!("{cut}...")
}

#[async_trait]
impl<C: MessageSender> ReportGenerator for LlmReportGenerator<C> {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn generate(&self, query: &str, evidence: &[AgentResponse]) -> Result<String> {
        let req = MessagesRequest::user(
            self.model.clone(),
            self.max_tokens,
            build_prompt(query, evidence),
        )
        .with_temperature(0.7);
        let response = self
            .client
            .send_message(&req)
            .await
            .map_err(|e| RcaError::GenerationFailure(e.to_string()))?;
        let text = response.text();
        if text.is_empty() {
            return Err(RcaError::GenerationFailure("empty report".into()));
        }
        Ok(text)
    }
}

/// Deterministic markdown digest of the evidence. Used when no LLM is configured.
pub struct TemplateReportGenerator;

#[async_trait]
impl ReportGenerator for TemplateReportGenerator {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn generate(&self, query: &str, evidence: &[AgentResponse]) -> Result<String> {
        if evidence.is_empty() {
            return Err(RcaError::GenerationFailure(
                "no successful agent responses to report on".into(),
            ));
        }

        let total: usize = evidence.iter().map(|r| r.evidence.len()).sum();
        let mut out = format!(
            "# Root Cause Analysis\n\n**Query:** {query}\n\n{total} evidence item(s) from {} source(s).\n",
            evidence.len()
        );
        for resp in evidence {
            out.push_str(&format!("\n## {}\n", resp.capability.label()));
            if resp.evidence.is_empty() {
                out.push_str("No matching records found.\n");
                continue;
            }
            for item in &resp.evidence {
                match &item.source {
                    Some(src) => out.push_str(&format!("- **{src}**: {}\n", excerpt(&item.text))),
                    None => out.push_str(&format!("- {}\n", excerpt(&item.text))),
                }
            }
        }
        Ok(out)
    }
}
