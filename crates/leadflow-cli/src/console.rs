//! Interactive outcome decisions read from stdin.

use async_trait::async_trait;

use leadflow_pipeline::{Decision, DecisionResolver};
use leadflow_types::{DisqualificationReason, PipelineCard, Result};

pub struct ConsoleDecision;

#[async_trait]
impl DecisionResolver for ConsoleDecision {
    async fn resolve(&self, card: &PipelineCard) -> Result<Option<Decision>> {
        println!("\n{} is entering the outcome stage.", card.lead.name);
        println!("  [1] qualify");
        println!("  [2] disqualify");
        println!("  [enter] abandon");

        match read_line()?.as_str() {
            "1" | "qualify" => {
                println!("Downstream pipelines (comma separated):");
                let pipelines: Vec<String> = read_line()?
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect();
                if pipelines.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Decision::qualify(pipelines)))
            }
            "2" | "disqualify" => {
                println!("Reason:");
                for (i, reason) in DisqualificationReason::ALL.iter().enumerate() {
                    println!("  [{}] {}", i + 1, reason);
                }
                let Some(reason) = pick_reason(&read_line()?) else {
                    return Ok(None);
                };
                println!("Detail (optional):");
                let detail = read_line()?;
                let detail = (!detail.is_empty()).then_some(detail);
                Ok(Some(Decision::disqualify(reason, detail)))
            }
            _ => Ok(None),
        }
    }
}

fn pick_reason(input: &str) -> Option<DisqualificationReason> {
    if let Ok(idx) = input.parse::<usize>() {
        return idx
            .checked_sub(1)
            .and_then(|i| DisqualificationReason::ALL.get(i).copied());
    }
    input.parse().ok()
}

fn read_line() -> Result<String> {
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
