use std::fmt::Debug;
use std::future::Future;

use thiserror::Error;
use tracing::{error, info};

const SEPARATOR: &str = "============================================================";

/// A named step of a workflow.
pub trait Phase: Copy + Debug {
    fn description(self) -> &'static str;
}

#[derive(Debug, Error)]
#[error("Phase '{phase}' failed")]
pub struct PhaseFailure {
    pub phase: &'static str,
    #[source]
    pub source: anyhow::Error,
}

/// Runs `phases` in order and stops at the first failure.
///
/// Returns the phases that completed.
///
/// # Errors
/// Returns `PhaseFailure` naming the first phase whose runner failed.
pub async fn run_phases<P, F, Fut>(phases: &[P], mut run: F) -> Result<Vec<P>, PhaseFailure>
where
    P: Phase,
    F: FnMut(P) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut completed = Vec::with_capacity(phases.len());
    for &phase in phases {
        let description = phase.description();
        banner(&format!("STARTING: {description}"));
        match run(phase).await {
            Ok(()) => {
                banner(&format!("COMPLETED: {description}"));
                completed.push(phase);
            }
            Err(source) => {
                error!("{SEPARATOR}");
                error!("FAILED: {description}");
                error!("Error: {source:#}");
                error!("{SEPARATOR}");
                return Err(PhaseFailure {
                    phase: description,
                    source,
                });
            }
        }
    }
    Ok(completed)
}

/// Logs `title` framed by separator lines.
pub fn banner(title: &str) {
    info!("{SEPARATOR}");
    info!("{title}");
    info!("{SEPARATOR}");
}
