//! Node status and reset commands

use anyhow::Result;
use chrono::Utc;
use tabled::Tabled;

use crate::client::{ApiClient, NodeStatus, RemediationRecord};
use crate::output::{
    color_score, color_state, format_age, print_info, print_json, print_success, print_warning,
    OutputFormat,
};

/// Row for the nodes table
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Policy")]
    policy: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Decision")]
    decision: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Failures")]
    failed_attempts: u32,
    #[tabled(rename = "Last Remediation")]
    last_remediation: String,
    #[tabled(rename = "Evaluated")]
    evaluated: String,
}

impl NodeRow {
    fn from_status(status: &NodeStatus) -> Self {
        let now = Utc::now();
        Self {
            node: status.node.clone(),
            policy: status.policy.clone().unwrap_or_else(|| "-".to_string()),
            score: color_score(status.score),
            decision: status
                .decision
                .as_ref()
                .map(|d| d.action.clone())
                .unwrap_or_else(|| "-".to_string()),
            state: color_state(&status.state),
            failed_attempts: status.failed_attempts,
            last_remediation: format_age(status.last_remediation_time, now),
            evaluated: format_age(Some(status.evaluated_at), now),
        }
    }
}

fn matches_state(status: &NodeStatus, state: Option<&str>) -> bool {
    state.map_or(true, |s| status.state.eq_ignore_ascii_case(s))
}

/// List the latest evaluation of every node
pub async fn list_nodes(
    client: &ApiClient,
    state: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let nodes: Vec<NodeStatus> = client.get("api/v1/nodes").await?;
    let filtered: Vec<NodeStatus> = nodes
        .into_iter()
        .filter(|n| matches_state(n, state.as_deref()))
        .collect();

    match format {
        OutputFormat::Json => print_json(&filtered)?,
        OutputFormat::Table => {
            if filtered.is_empty() {
                print_warning("No nodes found");
                return Ok(());
            }

            let rows: Vec<NodeRow> = filtered.iter().map(NodeRow::from_status).collect();
            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} nodes", filtered.len());
        }
    }

    Ok(())
}

/// Show the latest evaluation of one node
pub async fn get_node(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let status: NodeStatus = client.get(&format!("api/v1/nodes/{}", name)).await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            let table = tabled::Table::new([NodeRow::from_status(&status)])
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);

            if let Some(decision) = &status.decision {
                print_info(&format!("{}: {}", decision.action, decision.reason));
            }
            if let Some(outcome) = &status.outcome {
                print_info(&format!("Last outcome: {}", outcome));
            }
            if let Some(error) = &status.error {
                print_warning(&format!("Cycle failed ({}): {}", error.kind, error.message));
            }
        }
    }

    Ok(())
}

/// Clear a failed or halted remediation record
pub async fn reset_node(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let record: RemediationRecord = client
        .post(&format!("api/v1/nodes/{}/reset", name))
        .await?;

    match format {
        OutputFormat::Json => print_json(&record)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Node {} reset to {}, evaluation requeued",
                record.node,
                color_state(&record.state)
            ));
        }
    }

    Ok(())
}
