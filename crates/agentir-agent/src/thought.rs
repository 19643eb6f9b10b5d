//! Chain-of-thought generation.

use std::sync::Arc;

use agentir_store::{InformationState, Thought, ThoughtStore};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ThoughtsConfig;
use crate::error::Result;
use crate::llm::Completion;

/// A thought store shared between the agent and its policy.
pub type SharedThoughts = Arc<Mutex<ThoughtStore>>;

pub fn shared_thoughts() -> SharedThoughts {
    Arc::new(Mutex::new(ThoughtStore::new()))
}

/// Produces reasoning steps about a state.
#[async_trait]
pub trait ThoughtGenerator: Send + Sync {
    /// Thoughts about `state`, oldest first, each chained to the previous.
    async fn generate_thoughts(&self, state: &InformationState) -> Result<Vec<Thought>>;
}

/// Issues one completion per configured step type.
pub struct ChainOfThoughtGenerator {
    completion: Arc<dyn Completion>,
    steps: Vec<String>,
    max_thoughts: usize,
}

impl ChainOfThoughtGenerator {
    /// Analyze, plan, decide.
    pub fn new(completion: Arc<dyn Completion>) -> Self {
        Self::from_config(completion, &ThoughtsConfig::default())
    }

    pub fn from_config(completion: Arc<dyn Completion>, config: &ThoughtsConfig) -> Self {
        Self {
            completion,
            steps: config.steps.clone(),
            max_thoughts: config.max_thoughts,
        }
    }

    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_thoughts(mut self, max_thoughts: usize) -> Self {
        self.max_thoughts = max_thoughts;
        self
    }
}

/// Prompt for one step of the chain.
pub fn step_prompt(step: &str, state: &InformationState, previous: &[Thought]) -> String {
    let mut prompt = format!("Current Information State: {}\n\n", state.text);

    if !state.available_actions.is_empty() {
        prompt.push_str(&format!(
            "Available Actions: {}\n\n",
            state.available_actions.join(", ")
        ));
    }

    if !previous.is_empty() {
        prompt.push_str("Previous thoughts:\n");
        for thought in previous {
            prompt.push_str(&format!("[{}] {}\n\n", thought.kind, thought.text));
        }
    }

    let instruction = match step {
        "analyze" => {
            "Analyze the current situation. What is the information provided and what is the goal?"
                .to_owned()
        }
        "plan" => "Based on the analysis, what plan can be formulated to reach the goal? \
                   What steps need to be taken?"
            .to_owned(),
        "decide" => "Based on the analysis and plan, what action should be taken next? \
                     Provide a clear decision."
            .to_owned(),
        "reflect" => "Reflect on the current state and the process so far. \
                      What has been learned and what could be improved?"
            .to_owned(),
        other => format!(
            "Generate a thought of type '{other}' based on the current state and previous thoughts."
        ),
    };
    prompt.push_str(&instruction);
    prompt
}

#[async_trait]
impl ThoughtGenerator for ChainOfThoughtGenerator {
    async fn generate_thoughts(&self, state: &InformationState) -> Result<Vec<Thought>> {
        let mut thoughts: Vec<Thought> = Vec::new();

        for step in self.steps.iter().take(self.max_thoughts) {
            let prompt = step_prompt(step, state, &thoughts);
            let reply = self.completion.complete(&prompt).await;
            debug!(
                state_id = %state.id,
                step = %step,
                reply_len = reply.len(),
                "thought generated"
            );

            let parent = thoughts.last().map(|t| t.id.clone());
            thoughts.push(Thought::new(reply, step.as_str(), &state.id).with_parent(parent));
        }

        Ok(thoughts)
    }
}
