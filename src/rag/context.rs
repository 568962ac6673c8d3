//! Context assembly from retrieved snippets and conversation history

use crate::models::ConversationTurn;
use crate::models::DiagnosisResult;
use crate::rag::RetrievalResult;

/// Assembler for the grounded-prompt context block
pub struct ContextAssembler {
    max_context_chars: usize,
}

impl ContextAssembler {
    #[must_use]
    pub const fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars }
    }

    /// Format retrieved snippets as numbered sources with attribution.
    ///
    /// The numbering matches the `[n]` citation markers the system prompt
    /// asks the model to emit. Output is bounded: snippets that would push
    /// past the size budget are dropped from the tail.
    #[must_use]
    pub fn assemble(&self, retrieved: &RetrievalResult) -> String {
        let mut context = String::new();
        let mut total = 0;

        for (idx, entry) in retrieved.entries.iter().enumerate() {
            let block = format!(
                "\n[Source {}: {}]\n{}\n",
                idx + 1,
                entry.snippet.metadata.source,
                entry.snippet.text
            );

            if total + block.len() > self.max_context_chars {
                break;
            }

            context.push_str(&block);
            total += block.len();
        }

        context
    }

    /// Format diagnosis findings as an additional context block
    #[must_use]
    pub fn format_diagnosis(diagnosis: &DiagnosisResult) -> String {
        let mut block = String::from("\nImage diagnosis findings:\n");
        for finding in &diagnosis.findings {
            block.push_str(&format!(
                "- {} (confidence {:.0}%)",
                finding.label,
                finding.confidence * 100.0
            ));
            if let Some(action) = &finding.suggested_action {
                block.push_str(&format!("; suggested action: {action}"));
            }
            block.push('\n');
        }
        block
    }

    /// Render history turns for the prompt, oldest first
    #[must_use]
    pub fn history_messages(turns: &[ConversationTurn]) -> Vec<crate::llm::ChatMessage> {
        turns
            .iter()
            .map(|turn| crate::llm::ChatMessage {
                role: turn.role.as_str().to_string(),
                content: turn.text.clone(),
            })
            .collect()
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(4000)
    }
}
