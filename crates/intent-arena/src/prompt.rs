//! Prompts for the pairwise judge and the fallback classifier

use intent_core::IntentBrief;

// ============================================================================
// Prompt Builder
// ============================================================================

/// Builder for tagged prompts
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    system_instruction: String,
    context_sections: Vec<String>,
    question: String,
    instructions: Vec<String>,
}

impl PromptBuilder {
    /// Create a new prompt builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set system instruction
    pub fn system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    /// Add a context section
    pub fn add_context(mut self, context: impl Into<String>) -> Self {
        self.context_sections.push(context.into());
        self
    }

    /// Set the question
    pub fn question(mut self, q: impl Into<String>) -> Self {
        self.question = q.into();
        self
    }

    /// Add an instruction
    pub fn add_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instructions.push(instruction.into());
        self
    }

    /// Build the final prompt
    pub fn build(self) -> String {
        let mut prompt = String::new();

        if !self.system_instruction.is_empty() {
            prompt.push_str("<s>\n");
            prompt.push_str(&self.system_instruction);
            prompt.push_str("\n</s>\n\n");
        }

        if !self.context_sections.is_empty() {
            prompt.push_str("<context>\n");
            for section in &self.context_sections {
                prompt.push_str(section);
                prompt.push_str("\n\n");
            }
            prompt.push_str("</context>\n\n");
        }

        if !self.question.is_empty() {
            prompt.push_str("<utterance>\n");
            prompt.push_str(&self.question);
            prompt.push_str("\n</utterance>\n\n");
        }

        if !self.instructions.is_empty() {
            prompt.push_str("<instructions>\n");
            for (i, inst) in self.instructions.iter().enumerate() {
                prompt.push_str(&format!("{}. {}\n", i + 1, inst));
            }
            prompt.push_str("</instructions>\n");
        }

        prompt
    }
}

fn describe(label: &str, intent: &IntentBrief) -> String {
    format!(
        "[{label}] {} ({})\n{}",
        intent.name, intent.code, intent.description
    )
}

/// Prompt asking which of two intents fits the utterance better
pub fn pairwise_prompt(utterance: &str, first: &IntentBrief, second: &IntentBrief) -> String {
    PromptBuilder::new()
        .system(
            "You route user requests of a manufacturing and inventory system to business intents.",
        )
        .add_context(describe("first", first))
        .add_context(describe("second", second))
        .question(utterance)
        .add_instruction("Decide which of the two intents the utterance asks for.")
        .add_instruction("Judge by meaning, not by the order the intents are listed in.")
        .add_instruction(
            "Answer with JSON only: {\"winner\": \"first\" | \"second\", \"confidence\": 0.0-1.0}",
        )
        .build()
}

/// Prompt asking for a single intent out of a candidate set
pub fn classification_prompt(utterance: &str, candidates: &[IntentBrief]) -> String {
    let mut builder = PromptBuilder::new().system(
        "You route user requests of a manufacturing and inventory system to business intents.",
    );
    for (i, candidate) in candidates.iter().enumerate() {
        builder = builder.add_context(describe(&(i + 1).to_string(), candidate));
    }

    builder
        .question(utterance)
        .add_instruction("Pick the one intent the utterance asks for.")
        .add_instruction(
            "Answer with JSON only: {\"intent_code\": \"<code>\", \"confidence\": 0.0-1.0}",
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief(code: &str, name: &str) -> IntentBrief {
        IntentBrief {
            code: code.to_string(),
            name: name.to_string(),
            description: format!("{name}的说明"),
        }
    }

    #[test]
    fn test_prompt_builder() {
        let prompt = PromptBuilder::new()
            .system("You are a router.")
            .add_context("[1] A")
            .question("还有多少库存")
            .add_instruction("Be concise")
            .add_instruction("Answer in JSON")
            .build();

        assert!(prompt.starts_with("<s>\nYou are a router."));
        assert!(prompt.contains("<context>\n[1] A"));
        assert!(prompt.contains("<utterance>\n还有多少库存\n</utterance>"));
        assert!(prompt.contains("2. Answer in JSON"));
    }

    #[test]
    fn test_pairwise_prompt_lists_both_intents_in_order() {
        let prompt = pairwise_prompt(
            "还有多少库存",
            &brief("MATERIAL_BATCH_QUERY", "原料批次查询"),
            &brief("REPORT_INVENTORY_QUERY", "库存报表查询"),
        );
        let first = prompt.find("[first] 原料批次查询").unwrap();
        let second = prompt.find("[second] 库存报表查询").unwrap();
        assert!(first < second);
        assert!(prompt.contains("\"winner\""));
    }

    #[test]
    fn test_classification_prompt_numbers_candidates() {
        let prompt = classification_prompt("删除批次", &[brief("A", "甲"), brief("B", "乙")]);
        assert!(prompt.contains("[1] 甲 (A)"));
        assert!(prompt.contains("[2] 乙 (B)"));
        assert!(prompt.contains("\"intent_code\""));
    }
}
