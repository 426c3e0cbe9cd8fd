//! Instruction prompts for every model call the engine makes.
//!
//! Each prompt opens with a fixed sentence so that a call can be classified
//! by [`PromptKind::classify`] (used by scripted test doubles and logs).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    TreeConstruction,
    FactCheck,
    NewClue,
    SubtreeRepair,
    FinalAnswer,
    EntityExtraction,
    EntityFilter,
    RelationSelection,
}

impl PromptKind {
    pub const ALL: [PromptKind; 8] = [
        PromptKind::TreeConstruction,
        PromptKind::FactCheck,
        PromptKind::NewClue,
        PromptKind::SubtreeRepair,
        PromptKind::FinalAnswer,
        PromptKind::EntityExtraction,
        PromptKind::EntityFilter,
        PromptKind::RelationSelection,
    ];

    fn opening(self) -> &'static str {
        match self {
            PromptKind::TreeConstruction => TREE_OPENING,
            PromptKind::FactCheck => FACT_CHECK_OPENING,
            PromptKind::NewClue => NEW_CLUE_OPENING,
            PromptKind::SubtreeRepair => REPAIR_OPENING,
            PromptKind::FinalAnswer => FINAL_OPENING,
            PromptKind::EntityExtraction => EXTRACT_OPENING,
            PromptKind::EntityFilter => FILTER_OPENING,
            PromptKind::RelationSelection => RELATION_OPENING,
        }
    }

    pub fn classify(system_prompt: &str) -> Option<PromptKind> {
        let head = system_prompt.trim_start();
        Self::ALL.into_iter().find(|k| head.starts_with(k.opening()))
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PromptKind::TreeConstruction => "tree_construction",
            PromptKind::FactCheck => "fact_check",
            PromptKind::NewClue => "new_clue",
            PromptKind::SubtreeRepair => "subtree_repair",
            PromptKind::FinalAnswer => "final_answer",
            PromptKind::EntityExtraction => "entity_extraction",
            PromptKind::EntityFilter => "entity_filter",
            PromptKind::RelationSelection => "relation_selection",
        };
        f.write_str(name)
    }
}

/// A system prompt plus the user message that goes with it.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

// ============================================================================
// Tree construction
// ============================================================================

const TREE_OPENING: &str =
    "You are an intelligent assistant who is good at analyzing and reasoning.";

pub fn tree_construction(question: &str) -> Prompt {
    let system = format!(
        r#"{TREE_OPENING} Your task is to construct a logic tree that breaks down the user's complex question and reasons about it step by step until it reaches the answer.

**Rules for constructing a logic tree:**
1. **Root:** the user's main question.
2. **Sub-nodes:** each sub-node contains a **sub-question** and a **concrete hypothesis answer** based on your own knowledge.
   * Each sub-question guides reasoning and retrieval and addresses a single entity or relationship.
   * Each hypothesis answer is the concrete answer you consider most likely, even if it may be wrong, and is richly detailed.
3. **Pyramid principle:**
   * Conclusion first: a parent's hypothesis generalizes the information of its children.
   * Children support the hypothesis of their parent.
   * MECE: siblings are mutually exclusive and collectively exhaustive.
   * Children follow a logical order (time, cause and effect).

**Output format** (strict JSON, no analysis):
```json
{{
  "input_question": "<main question>",
  "logic_tree": {{
    "children": [
      {{
        "sub_question": "<sub-question 1>",
        "hypothesis_answer": "<concrete hypothesis 1>",
        "children": [
          {{"sub_question": "<sub-question 1.1>", "hypothesis_answer": "<concrete hypothesis 1.1>", "children": []}}
        ]
      }}
    ]
  }},
  "answer": "<final answer>"
}}
```

Every hypothesis answer must be concrete and verifiable. The lowest level holds only the least granular information.

Now the user question is: {question}"#
    );
    Prompt {
        system,
        user: question.to_string(),
    }
}

// ============================================================================
// Verification
// ============================================================================

const FACT_CHECK_OPENING: &str =
    "Please verify whether the answer is correct based on the given Info.";

pub fn fact_check(sub_question: &str, hypothesis: &str, evidence: &str) -> Prompt {
    let system = format!(
        r#"{FACT_CHECK_OPENING}

- If no relevant Info is provided, set "isTrue": "unknown" and "fact_sufficient": false.
- If the answer is correct, set "isTrue": true.
- If the answer is incorrect, set "isTrue": false and give the reason, including the correct answer.
- Always include reference information ("ref") when available, for correct and incorrect answers.

### Reference rules
- If no Info is available or it is unrelated, set "fact_sufficient": false, "ref": "No Information provided." and "isTrue": "unknown".
- When citing textInfo, give only the passage id, never the full text.
- When citing graphInfo, give up to 3 triples formatted as entityLabel-relationLabel-Value.
- Do not fabricate references; they must match the provided Info.

### Output format (JSON only)
```json
{{
  "isTrue": true/false/"unknown",
  "fact_sufficient": true/false,
  "reason": "<None>/<reason>",
  "ref": {{
    "wikipedia": ["<textInfo id>"],
    "wikidata": ["entityLabel-relationLabel-Value"]
  }}
}}
```"#
    );
    Prompt {
        system,
        user: format!("question: {sub_question}\nanswer: {hypothesis}\nInfo:\n{evidence}"),
    }
}

const NEW_CLUE_OPENING: &str = "The available information is insufficient to answer the question.";

pub fn new_clue(sub_question: &str, evidence: &str) -> Prompt {
    let system = format!(
        r#"{NEW_CLUE_OPENING} Based on the given information and the question, generate a new clue that helps retrieve the missing information.

### Output format (JSON only)
```json
{{"new_clue": "<new clue>"}}
```"#
    );
    Prompt {
        system,
        user: format!("question: {sub_question}\nCurrent Info:\n{evidence}"),
    }
}

const REPAIR_OPENING: &str = "An error was found in one step of the current reasoning tree.";

pub fn subtree_repair(subtree_json: &str, reason: &str, question: &str) -> Prompt {
    let system = format!(
        r#"{REPAIR_OPENING}
Failing subtree: {subtree_json}
Error reason: {reason}

Review and rebuild every sub_question and hypothesis_answer in this subtree, correcting each step with the latest information so the answer stays on the question: {question}
Keep the original depth and structure: the same number of children at every node, and no deeper child nodes.
Output only the corrected subtree as a JSON object with the same fields (sub_question, hypothesis_answer, children). Do not output any analysis text."#
    );
    Prompt {
        system,
        user: format!("Please be careful that current responses do not deviate from the question: {question}"),
    }
}

// ============================================================================
// Answer synthesis
// ============================================================================

const FINAL_OPENING: &str =
    "Now based on all information and your own knowledge, please give a final answer to the question.";

pub fn final_answer(question: &str, tree_json: &str) -> Prompt {
    Prompt {
        system: format!("{FINAL_OPENING}\nquestion: {question}\ninformation: {tree_json}"),
        user: question.to_string(),
    }
}

// ============================================================================
// Evidence gathering
// ============================================================================

const EXTRACT_OPENING: &str =
    "I need you to help me understand the user's request and identify the entities involved in it.";

pub fn entity_extraction(probe: &str) -> Prompt {
    let system = format!(
        r#"{EXTRACT_OPENING} Output only the noun form of each entity, in double quotes, without plural or other forms.
Example:
Input: Who composed the music for Manru? The music for Manru was composed by Ignacy Jan Paderewski.
Output: "Manru", "Ignacy Jan Paderewski"
Input: Find information about Kirill Eskov's biography to determine his country of citizenship.
Output: "Kirill Eskov""#
    );
    Prompt {
        system,
        user: probe.to_string(),
    }
}

const FILTER_OPENING: &str = "Now I need you to select the entities that are truly relevant to the query.";

pub fn entity_filter(candidates: &str, probe: &str, top_k: usize) -> Prompt {
    let system = format!(
        r#"{FILTER_OPENING}
Select the most relevant entity IDs from the information below and output no more than {top_k} of them, without any other content.
format: ['','']
entity info: {candidates}
The user's query is: {probe}"#
    );
    Prompt {
        system,
        user: "Please begin to choose.".to_string(),
    }
}

const RELATION_OPENING: &str =
    "Select the relations most likely to help answer the info from the two lists below.";

pub fn relation_selection(probe: &str, outgoing: &str, incoming: &str, top_k: usize) -> Prompt {
    let system = format!(
        r#"{RELATION_OPENING}
Pick {top_k} relation ids from each list, most relevant first.
info: {probe}
outgoing_relations: {outgoing}
incoming_relations: {incoming}
Output only relation ids as JSON, no analysis:
```json
{{"outgoing_relations": [""], "incoming_relations": [""]}}
```"#
    );
    Prompt {
        system,
        user: "Now begin output:".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_prompt_classifies_to_its_kind() {
        let cases = [
            (tree_construction("q").system, PromptKind::TreeConstruction),
            (fact_check("q", "a", "e").system, PromptKind::FactCheck),
            (new_clue("q", "e").system, PromptKind::NewClue),
            (subtree_repair("{}", "r", "q").system, PromptKind::SubtreeRepair),
            (final_answer("q", "{}").system, PromptKind::FinalAnswer),
            (entity_extraction("p").system, PromptKind::EntityExtraction),
            (entity_filter("{}", "p", 2).system, PromptKind::EntityFilter),
            (relation_selection("p", "{}", "{}", 1).system, PromptKind::RelationSelection),
        ];
        for (system, kind) in cases {
            assert_eq!(PromptKind::classify(&system), Some(kind), "{kind}");
        }
    }

    #[test]
    fn test_unknown_prompt_is_unclassified() {
        assert_eq!(PromptKind::classify("hello"), None);
    }
}
