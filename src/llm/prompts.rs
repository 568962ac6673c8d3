//! Prompt templates for the agricultural advisor

use std::fmt;

/// Languages the assistant answers in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreferredLanguage {
    #[default]
    Malayalam,
    English,
    Hindi,
}

impl PreferredLanguage {
    /// Parse a user profile language string, defaulting to English for
    /// anything unrecognized.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() {
            Some("malayalam") | Some("ml") => Self::Malayalam,
            Some("hindi") | Some("hi") => Self::Hindi,
            Some(_) => Self::English,
            None => Self::Malayalam,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malayalam => "malayalam",
            Self::English => "english",
            Self::Hindi => "hindi",
        }
    }
}

impl fmt::Display for PreferredLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// System prompt for grounded answers, per language
#[must_use]
pub fn system_prompt(language: PreferredLanguage) -> &'static str {
    match language {
        PreferredLanguage::Malayalam => {
            "You are a knowledgeable agricultural advisor specifically for farmers in Kerala, India. \
             Respond in Malayalam language. Provide practical, locally relevant farming advice considering \
             Kerala's climate, soil conditions, and traditional farming practices. Include seasonal \
             recommendations, pest management, and sustainable farming techniques. Base your answer on the \
             numbered knowledge sources provided and cite them inline as [1], [2] and so on. Be concise but helpful."
        }
        PreferredLanguage::English => {
            "You are a knowledgeable agricultural advisor for farmers in Kerala, India. \
             Provide practical, locally relevant farming advice considering Kerala's tropical climate, \
             soil conditions, and agricultural practices. Include seasonal recommendations, pest management, \
             and sustainable farming techniques. Base your answer on the numbered knowledge sources provided \
             and cite them inline as [1], [2] and so on. Be concise but helpful."
        }
        PreferredLanguage::Hindi => {
            "आप केरल, भारत के किसानों के लिए एक जानकार कृषि सलाहकार हैं। \
             हिंदी में जवाब दें। केरल की जलवायु, मिट्टी की स्थिति और पारंपरिक खेती की प्रथाओं को ध्यान में रखते हुए \
             व्यावहारिक, स्थानीय रूप से प्रासंगिक कृषि सलाह प्रदान करें। दिए गए क्रमांकित ज्ञान स्रोतों के आधार पर \
             उत्तर दें और उन्हें [1], [2] के रूप में उद्धृत करें।"
        }
    }
}

/// Instruction appended when retrieval produced no snippets above the
/// relevance cutoff: the answer must be generic and labeled as such.
#[must_use]
pub const fn ungrounded_instruction() -> &'static str {
    "No matching entries were found in the knowledge base for this question. \
     Give general agricultural guidance only, and state clearly at the start of your answer \
     that it is general advice not based on the curated knowledge base. Do not invent citations."
}

/// Fallback answer shown when every downstream recovery attempt failed,
/// in the user's preferred language.
#[must_use]
pub fn fallback_message(language: PreferredLanguage) -> &'static str {
    match language {
        PreferredLanguage::Malayalam => {
            "ക്ഷമിക്കണം, ഇപ്പോൾ നിങ്ങളുടെ ചോദ്യത്തിന് ഉത്തരം നൽകാൻ കഴിയുന്നില്ല. ദയവായി പിന്നീട് വീണ്ടും ശ്രമിക്കുക."
        }
        PreferredLanguage::English => {
            "Sorry, I'm unable to answer your question right now. Please try again later."
        }
        PreferredLanguage::Hindi => {
            "क्षमा करें, अभी मैं आपके प्रश्न का उत्तर देने में असमर्थ हूं। कृपया बाद में फिर से कोशिश करें।"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parsing() {
        assert_eq!(
            PreferredLanguage::parse(Some("Malayalam")),
            PreferredLanguage::Malayalam
        );
        assert_eq!(
            PreferredLanguage::parse(Some("hi")),
            PreferredLanguage::Hindi
        );
        assert_eq!(
            PreferredLanguage::parse(Some("tamil")),
            PreferredLanguage::English
        );
        // Profile default is Malayalam, matching the user base
        assert_eq!(PreferredLanguage::parse(None), PreferredLanguage::Malayalam);
    }

    #[test]
    fn test_prompts_are_distinct_per_language() {
        let ml = system_prompt(PreferredLanguage::Malayalam);
        let en = system_prompt(PreferredLanguage::English);
        let hi = system_prompt(PreferredLanguage::Hindi);
        assert_ne!(ml, en);
        assert_ne!(en, hi);
    }
}
