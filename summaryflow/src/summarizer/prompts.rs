//! Prompt templates for the standard summarization pipeline.

use serde::{Deserialize, Serialize};

use crate::stages::{PromptTemplate, INPUT_PLACEHOLDER};

const ANALYZE: &str = "Read the document below and describe it. Reply with a JSON object \
with the fields \"topic\", \"audience\", \"tone\" and \"structure\".\n\nDocument:\n{input}";

const EXTRACT: &str = "Here is an analysis of a document:\n{input}\n\nList the key points of the \
document, one per line, paying particular attention to {focus}.\n\nDocument:\n{input_text}";

const SUMMARIZE: &str = "Write a {length} summary in a {style} style based on these key \
points:\n{input}";

const REFINE: &str = "Check this summary against the source document and improve it. Keep it \
{length} and {style}.\n\nSource:\n{input_text}\n\nSummary:\n{input}\n\nReply only with JSON of \
the form {\"refined_summary\": \"...\", \"needs_refinement\": true|false}, setting \
needs_refinement to true only if another pass would clearly help.";

const FORMAT: &str = "Format the following summary as {format}. Do not add new content.\n\n{input}";

/// The prompts used by each stage of the standard pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSet {
    /// Document analysis; writes a record.
    pub analyze: PromptTemplate,
    /// Key point extraction.
    pub extract: PromptTemplate,
    /// First draft.
    pub summarize: PromptTemplate,
    /// One refinement pass; must ask for a refinement record.
    pub refine: PromptTemplate,
    /// Final layout.
    pub format: PromptTemplate,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            analyze: ANALYZE.into(),
            extract: EXTRACT.into(),
            summarize: SUMMARIZE.into(),
            refine: REFINE.into(),
            format: FORMAT.into(),
        }
    }
}

impl PromptSet {
    /// Every stage sends its input unchanged.
    #[must_use]
    pub fn passthrough() -> Self {
        let input = PromptTemplate::new(format!("{{{INPUT_PLACEHOLDER}}}"));
        Self {
            analyze: input.clone(),
            extract: input.clone(),
            summarize: input.clone(),
            refine: input.clone(),
            format: input,
        }
    }
}
