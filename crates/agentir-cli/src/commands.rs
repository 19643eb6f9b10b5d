//! Subcommand implementations.

use std::sync::Arc;

use agentir_agent::{
    Agent, AgentirConfig, ChainOfThoughtGenerator, DEFAULT_SYSTEM_PROMPT, HybridPolicy,
    InformationState, LlmPolicy, LlmRewardModel, POLICY_SYSTEM_PROMPT, RandomPolicy, RewardModel,
    RunResult, SimpleRewardModel, THOUGHT_SYSTEM_PROMPT, shared_thoughts,
};
use anyhow::Result;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::helpers::{completion, open_durable_store, use_sqlite};

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub async fn cmd_run(mut config: AgentirConfig, args: RunArgs) -> Result<()> {
    use_sqlite(&mut config, args.db.clone());
    if args.think {
        config.thoughts.enabled = true;
    }
    let mut agent = build_agent(&config, &args).await?;

    if args.actions.is_empty() {
        warn!("no --action given; the policy can only return no_op");
    }
    let start = InformationState::new(&args.text).with_actions(args.actions.iter().cloned());
    agent.set_current_state(start).await?;
    if let Some(goal) = &args.goal {
        agent.set_target_state(InformationState::new(goal)).await?;
    }

    info!(policy = args.policy.name(), "starting run");
    let result = agent.run(None, args.max_steps, false).await?;
    print_run(&result);

    if args.reflect {
        println!();
        println!("Reflections:");
        for line in agent.reflect(None).await? {
            println!("  - {line}");
        }
    }
    Ok(())
}

async fn build_agent(config: &AgentirConfig, args: &RunArgs) -> Result<Agent> {
    let memory = config.memory.open_store().await?;
    let thoughts = shared_thoughts();

    let mut llm_policy = LlmPolicy::new(completion(config, POLICY_SYSTEM_PROMPT)?)
        .with_memory(Arc::clone(&memory))
        .with_max_experiences(config.agent.max_experiences);
    let generator = if config.thoughts.enabled {
        let generator = Arc::new(ChainOfThoughtGenerator::from_config(
            completion(config, THOUGHT_SYSTEM_PROMPT)?,
            &config.thoughts,
        ));
        llm_policy = llm_policy.with_thoughts(generator.clone(), Arc::clone(&thoughts));
        Some(generator)
    } else {
        None
    };

    let random = match args.seed {
        Some(seed) => RandomPolicy::seeded(seed),
        None => RandomPolicy::new(),
    };
    let policy = HybridPolicy::new(args.policy.name())
        .with_policy("llm", Arc::new(llm_policy))
        .with_policy("random", Arc::new(random))
        .with_weight_updates(config.agent.update_policy_weights);

    let reward_model: Arc<dyn RewardModel> = if args.llm_reward {
        Arc::new(LlmRewardModel::new(completion(config, DEFAULT_SYSTEM_PROMPT)?)?)
    } else {
        Arc::new(SimpleRewardModel::new(config.reward.clone()))
    };

    let mut agent = Agent::new("agentir", Arc::new(policy))
        .with_config(config)
        .with_memory(memory)
        .with_thought_store(thoughts)
        .with_reward_model(reward_model);
    if let Some(generator) = generator {
        agent = agent.with_thought_generator(generator);
    }
    Ok(agent)
}

fn print_run(result: &RunResult) {
    for (i, (action, (state, reward))) in result
        .actions
        .iter()
        .zip(result.states.iter().skip(1).zip(&result.rewards))
        .enumerate()
    {
        println!("step {:>2}  {:<20} reward {:>7.3}  {}", i + 1, action.name, reward, state.text);
    }
    println!();
    println!("Finished: {}", result.terminal_reason);
    println!("  steps:        {}", result.steps());
    println!("  success:      {}", result.success);
    println!("  total reward: {:.3}", result.total_reward());
    println!("  final state:  {} ({})", result.final_state.text, result.final_state.id);
}

// ---------------------------------------------------------------------------
// history / search
// ---------------------------------------------------------------------------

pub async fn cmd_history(config: AgentirConfig, state_id: &str) -> Result<()> {
    let store = open_durable_store(&config).await?;
    let chain = store.get_state_history(state_id).await?;
    if chain.is_empty() {
        println!("No state with id {state_id}");
        return Ok(());
    }
    for (depth, state) in chain.iter().enumerate() {
        println!("{:indent$}{}  {}", "", state.id, state.text, indent = depth * 2);
    }
    Ok(())
}

pub async fn cmd_search(config: AgentirConfig, query: &str, limit: usize) -> Result<()> {
    let store = open_durable_store(&config).await?;
    let found = store.search_states(query, limit).await?;
    if found.is_empty() {
        println!("No states match \"{query}\"");
        return Ok(());
    }
    for state in &found {
        println!("{}  {}", state.id, state.text);
    }
    println!("{} state(s)", found.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

pub fn cmd_config(config: &AgentirConfig) -> Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}
