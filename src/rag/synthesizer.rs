//! Grounded answer synthesis and post-processing

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::warn;

use crate::errors::KrishiRagError;
use crate::errors::Result;
use crate::llm::prompts;
use crate::llm::ChatBackend;
use crate::llm::ChatMessage;
use crate::llm::PreferredLanguage;
use crate::models::Citation;
use crate::models::ConversationTurn;
use crate::models::DiagnosisResult;
use crate::rag::ContextAssembler;
use crate::rag::RetrievalResult;

/// Synthesis tuning knobs, lifted from the llm config section
#[derive(Debug, Clone)]
pub struct SynthesizerOptions {
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout: Duration,
    pub max_answer_chars: usize,
    pub history_turns: usize,
}

impl SynthesizerOptions {
    #[must_use]
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self {
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            timeout: Duration::from_secs(config.llm.timeout_secs),
            max_answer_chars: config.llm.max_answer_chars,
            history_turns: config.llm.history_turns,
        }
    }
}

/// Structurally well-formed synthesis output.
///
/// The underlying generative call is non-deterministic; the synthesizer
/// guarantees only that the answer is non-empty, within the length bound
/// and that citations point at snippets that were actually in the prompt.
#[derive(Debug, Clone)]
pub struct SynthesizedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub tips: Vec<String>,
    pub trust_score: f32,
    pub grounded: bool,
}

/// Composes the grounded prompt and post-processes the model reply
pub struct AnswerSynthesizer {
    backend: Arc<dyn ChatBackend>,
    assembler: ContextAssembler,
    options: SynthesizerOptions,
}

impl AnswerSynthesizer {
    pub fn new(backend: Arc<dyn ChatBackend>, options: SynthesizerOptions) -> Self {
        Self {
            backend,
            assembler: ContextAssembler::default(),
            options,
        }
    }

    /// Synthesize an answer from retrieval context, history and diagnosis.
    ///
    /// # Errors
    /// - `Synthesis` on backend failure, timeout or malformed output; the
    ///   coordinator converts that into a degraded response, raw model
    ///   output is never passed through partially.
    pub async fn synthesize(
        &self,
        question: &str,
        language: PreferredLanguage,
        history: &[ConversationTurn],
        retrieved: &RetrievalResult,
        diagnosis: Option<&DiagnosisResult>,
    ) -> Result<SynthesizedAnswer> {
        let grounded = !retrieved.is_empty();
        let messages = self.build_messages(question, language, history, retrieved, diagnosis);

        debug!(
            "Synthesizing answer: {} message(s), {} source(s), grounded={}",
            messages.len(),
            retrieved.len(),
            grounded
        );

        let raw = tokio::time::timeout(
            self.options.timeout,
            self.backend
                .chat(&messages, self.options.temperature, self.options.max_tokens),
        )
        .await
        .map_err(|_| KrishiRagError::Synthesis("generative call timed out".to_string()))??;

        self.postprocess(&raw, retrieved, grounded)
    }

    fn build_messages(
        &self,
        question: &str,
        language: PreferredLanguage,
        history: &[ConversationTurn],
        retrieved: &RetrievalResult,
        diagnosis: Option<&DiagnosisResult>,
    ) -> Vec<ChatMessage> {
        let mut system = prompts::system_prompt(language).to_string();
        if retrieved.is_empty() {
            system.push_str("\n\n");
            system.push_str(prompts::ungrounded_instruction());
        }

        let mut messages = vec![ChatMessage::system(system)];

        let skip = history.len().saturating_sub(self.options.history_turns);
        messages.extend(ContextAssembler::history_messages(&history[skip..]));

        let mut user = String::new();
        if !retrieved.is_empty() {
            user.push_str("Knowledge sources:\n");
            user.push_str(&self.assembler.assemble(retrieved));
            user.push('\n');
        }
        if let Some(diagnosis) = diagnosis {
            user.push_str(&ContextAssembler::format_diagnosis(diagnosis));
            user.push('\n');
        }
        user.push_str(&format!("Question: {question}"));
        messages.push(ChatMessage::user(user));

        messages
    }

    /// Enforce structural well-formedness on the raw model reply.
    fn postprocess(
        &self,
        raw: &str,
        retrieved: &RetrievalResult,
        grounded: bool,
    ) -> Result<SynthesizedAnswer> {
        let cleaned = strip_leaked_prompt(raw);
        let cleaned = scrub_sensitive(&cleaned);
        let answer = truncate_chars(cleaned.trim(), self.options.max_answer_chars);

        if answer.is_empty() {
            return Err(KrishiRagError::Synthesis(
                "model returned an empty answer".to_string(),
            ));
        }

        let citations = extract_citations(&answer, retrieved);
        let tips = extract_tips(&answer);

        // Trust scoring per the advisory contract: capped, lower without grounding
        let confidence = if grounded { 0.85 } else { 0.5 };
        let trust_score = (confidence * 0.95_f32).min(0.95);

        Ok(SynthesizedAnswer {
            answer,
            citations,
            tips,
            trust_score,
            grounded,
        })
    }
}

/// Drop any lines where the model echoed its instructions back
fn strip_leaked_prompt(raw: &str) -> String {
    raw.lines()
        .filter(|line| {
            let lower = line.trim().to_lowercase();
            !(lower.starts_with("system:")
                || lower.starts_with("instructions:")
                || lower.starts_with("knowledge sources:")
                || lower.starts_with("you are a knowledgeable agricultural advisor"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Mask emails, long digit runs (phone numbers) and profanity.
///
/// Token-based: replaces whole whitespace-delimited tokens, leaving the
/// rest of the text untouched.
fn scrub_sensitive(text: &str) -> String {
    const PROFANITY: &[&str] = &["damn", "hell", "bloody", "stupid", "idiot"];

    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let mut first = true;
        for token in line.split(' ') {
            if !first {
                out.push(' ');
            }
            first = false;

            let bare = token.trim_matches(|c: char| !c.is_alphanumeric());
            let digits = token.chars().filter(char::is_ascii_digit).count();

            if bare.contains('@') && bare.contains('.') {
                out.push_str("[email removed]");
            } else if digits >= 8 && digits * 2 >= token.len() {
                out.push_str("[number removed]");
            } else if PROFANITY.contains(&bare.to_lowercase().as_str()) {
                out.push_str("****");
            } else {
                out.push_str(token);
            }
        }
        out.push('\n');
    }
    out.pop();
    out
}

/// Truncate to a character budget on a char boundary
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Resolve `[n]` markers in the answer to the snippets actually prompted.
///
/// A grounded answer with no recognizable markers cites every prompted
/// snippet, so citations are never silently lost.
fn extract_citations(answer: &str, retrieved: &RetrievalResult) -> Vec<Citation> {
    if retrieved.is_empty() {
        return Vec::new();
    }

    let mut referenced = Vec::new();
    for (idx, entry) in retrieved.entries.iter().enumerate() {
        let marker = format!("[{}]", idx + 1);
        if answer.contains(&marker) {
            referenced.push(Citation {
                snippet_id: entry.snippet.id,
                source: entry.snippet.metadata.source.clone(),
                score: entry.score,
            });
        }
    }

    if referenced.is_empty() {
        warn!("Grounded answer carried no citation markers; citing all prompted sources");
        referenced = retrieved
            .entries
            .iter()
            .map(|entry| Citation {
                snippet_id: entry.snippet.id,
                source: entry.snippet.metadata.source.clone(),
                score: entry.score,
            })
            .collect();
    }

    referenced
}

/// Extract up to three actionable tips from the answer text
fn extract_tips(answer: &str) -> Vec<String> {
    const MARKERS: &[&str] = &["tip:", "suggestion:", "recommend:", "try:"];

    answer
        .lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            MARKERS.iter().any(|marker| lower.contains(marker))
        })
        .map(|line| line.trim().to_string())
        .take(3)
        .collect()
}
