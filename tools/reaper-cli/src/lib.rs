//! Operator CLI for ad-hoc evaluation, policy administration, and
//! retention control against a running `reaper-agent`/`reaper-platform`
//! pair.
//!
//! URL building, request-shaping and command dispatch live here so they
//! can be exercised without a real binary; `main.rs` only parses `Cli`
//! and prints the result.

use clap::{Parser, Subcommand};
use reaper_core::endpoints;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "reaper")]
#[command(about = "Reaper CLI - ad-hoc evaluation and policy administration")]
#[command(version = reaper_core::VERSION)]
pub struct Cli {
    /// Base URL of the reaper-agent service
    #[arg(long, env = "REAPER_AGENT_URL", default_value = "http://127.0.0.1:8080")]
    pub agent_url: String,

    /// Base URL of the reaper-platform service
    #[arg(long, env = "REAPER_PLATFORM_URL", default_value = "http://127.0.0.1:8081")]
    pub platform_url: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate a single access request against the agent
    Evaluate {
        subject: String,
        action: String,
        resource: String,
    },
    /// Policy administration commands
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
    /// Retention and partition commands
    Retention {
        #[command(subcommand)]
        action: RetentionAction,
    },
    /// Health of the agent and platform services
    Status,
}

#[derive(Subcommand)]
pub enum PolicyAction {
    /// List all policies known to the platform
    List,
    /// Show a single policy by id
    Get { id: String },
    /// Create a new policy. `dsl_text` must be json-1 encoded.
    Create {
        name: String,
        dsl_text: String,
        #[arg(long, default_value_t = true)]
        enabled: bool,
    },
    /// Toggle a policy's enabled flag
    SetEnabled { id: String, enabled: bool },
    /// Delete a policy
    Delete { id: String },
}

#[derive(Subcommand)]
pub enum RetentionAction {
    /// Show the platform's configured retention windows
    Status,
    /// Trigger a retention cycle immediately
    Run,
    /// List known and dropped partitions
    Partitions,
}

pub fn evaluate_url(agent_url: &str) -> String {
    format!("{agent_url}{}", endpoints::API_V1_EVALUATE)
}

pub fn evaluate_payload(subject: &str, action: &str, resource: &str) -> Value {
    json!({ "subject": subject, "action": action, "resource": resource })
}

pub fn policies_url(platform_url: &str) -> String {
    format!("{platform_url}{}", endpoints::API_V1_POLICIES)
}

pub fn policy_url(platform_url: &str, id: &str) -> String {
    format!("{}/{id}", policies_url(platform_url))
}

pub fn create_policy_payload(name: &str, dsl_text: &str, enabled: bool) -> Value {
    json!({ "name": name, "dsl_text": dsl_text, "enabled": enabled })
}

pub fn set_enabled_payload(enabled: bool) -> Value {
    json!({ "enabled": enabled })
}

pub fn retention_url(platform_url: &str) -> String {
    format!("{platform_url}{}", endpoints::API_V1_RETENTION)
}

pub fn partitions_url(platform_url: &str) -> String {
    format!("{platform_url}{}", endpoints::API_V1_PARTITIONS)
}

pub fn health_url(base_url: &str) -> String {
    format!("{base_url}{}", endpoints::HEALTH)
}

pub async fn evaluate(
    client: &reqwest::Client,
    agent_url: &str,
    subject: String,
    action: String,
    resource: String,
) -> anyhow::Result<Value> {
    let response = client
        .post(evaluate_url(agent_url))
        .json(&evaluate_payload(&subject, &action, &resource))
        .send()
        .await?;
    Ok(response.json().await?)
}

pub async fn policy_action(client: &reqwest::Client, platform_url: &str, action: PolicyAction) -> anyhow::Result<Value> {
    match action {
        PolicyAction::List => Ok(client.get(policies_url(platform_url)).send().await?.json().await?),
        PolicyAction::Get { id } => Ok(client.get(policy_url(platform_url, &id)).send().await?.json().await?),
        PolicyAction::Create { name, dsl_text, enabled } => Ok(client
            .post(policies_url(platform_url))
            .json(&create_policy_payload(&name, &dsl_text, enabled))
            .send()
            .await?
            .json()
            .await?),
        PolicyAction::SetEnabled { id, enabled } => Ok(client
            .put(policy_url(platform_url, &id))
            .json(&set_enabled_payload(enabled))
            .send()
            .await?
            .json()
            .await?),
        PolicyAction::Delete { id } => Ok(client.delete(policy_url(platform_url, &id)).send().await?.json().await?),
    }
}

pub async fn retention_action(
    client: &reqwest::Client,
    platform_url: &str,
    action: RetentionAction,
) -> anyhow::Result<Value> {
    match action {
        RetentionAction::Status => Ok(client.get(retention_url(platform_url)).send().await?.json().await?),
        RetentionAction::Run => Ok(client.post(retention_url(platform_url)).send().await?.json().await?),
        RetentionAction::Partitions => Ok(client.get(partitions_url(platform_url)).send().await?.json().await?),
    }
}

pub async fn status(client: &reqwest::Client, agent_url: &str, platform_url: &str) -> anyhow::Result<Value> {
    let agent = fetch_health(client, agent_url).await;
    let platform = fetch_health(client, platform_url).await;
    Ok(json!({ "agent": agent, "platform": platform }))
}

pub async fn fetch_health(client: &reqwest::Client, base_url: &str) -> Value {
    match client.get(health_url(base_url)).send().await {
        Ok(response) => response.json().await.unwrap_or_else(|err| json!({ "error": err.to_string() })),
        Err(err) => json!({ "status": "unreachable", "error": err.to_string() }),
    }
}

/// Dispatch a parsed [`Cli`] invocation to its handler and return the
/// JSON value to print.
pub async fn run(cli: Cli) -> anyhow::Result<Value> {
    let client = reqwest::Client::new();
    match cli.command {
        Commands::Evaluate { subject, action, resource } => {
            evaluate(&client, &cli.agent_url, subject, action, resource).await
        }
        Commands::Policy { action } => policy_action(&client, &cli.platform_url, action).await,
        Commands::Retention { action } => retention_action(&client, &cli.platform_url, action).await,
        Commands::Status => status(&client, &cli.agent_url, &cli.platform_url).await,
    }
}
